//! Tool Registry (C3, §4.3): declares the nine tool schemas the agent may
//! call and dispatches invocations to the Corpus Store / external search.
//!
//! Built as a thin layer over the generic `tools::Tool` abstraction:
//! [`build_registry`] closes nine [`Tool`] values over `Arc` handles to the
//! Corpus Store, Insight Log, Citation Verifier, and a case-law provider. A
//! handler's `Err` is never propagated to the Tool Loop — each handler here
//! catches its own errors and folds them into a structured
//! `{error, message}` value instead of failing the loop (§4.3).

use crate::citation_verifier::{CitationResult, CitationVerdict, CitationVerifier, GroundedVerifier, LocalCitationIndex};
use crate::context_builder::ContextBuilder;
use crate::corpus::CorpusStore;
use crate::event_bus::EventBus;
use crate::insight_log::InsightLog;
use crate::models::{AnalysisType, CaseNumber, Scope};
use crate::tools::{tool, Tool};
use serde_json::{json, Value};
use std::sync::Arc;

/// A single case-law precedent returned by a grounded web search.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PrecedentHit {
    pub case_name: String,
    pub citation: String,
    pub court: Option<String>,
    pub date: Option<String>,
    pub snippet: String,
    pub url: String,
}

/// External, grounded case-law search. The server binary backs this with
/// whatever web-search capability the model provider's SDK exposes (or the
/// optional `CASE_NEXUS_WEB_SEARCH_KEY` provider, spec §6 "Environment").
#[async_trait::async_trait]
pub trait CaseLawProvider: Send + Sync {
    async fn search_case_law(&self, query: &str, court: Option<&str>) -> crate::Result<Vec<PrecedentHit>>;
    async fn search_precedents_for_charges(&self, charges: &[String]) -> crate::Result<Vec<PrecedentHit>>;
}

fn error_value(kind: &str, message: impl std::fmt::Display) -> Value {
    json!({"error": kind, "message": message.to_string()})
}

/// Builds the nine tools exposed to the agent (§4.3 table). Each tool is a
/// pure function of its inputs plus the collaborators closed over here.
pub fn build_registry(
    corpus: Arc<dyn CorpusStore>,
    insights: Arc<InsightLog>,
    citation_index: Arc<LocalCitationIndex>,
    grounded_verifier: Arc<dyn GroundedVerifier>,
    case_law: Arc<dyn CaseLawProvider>,
    event_bus: Arc<EventBus>,
) -> Vec<Arc<Tool>> {
    vec![
        Arc::new(build_get_case(corpus.clone())),
        Arc::new(build_get_case_context(corpus.clone(), insights.clone())),
        Arc::new(build_get_legal_context(corpus.clone(), insights.clone())),
        Arc::new(build_get_alerts(corpus.clone())),
        Arc::new(build_get_connections(corpus.clone())),
        Arc::new(build_get_prior_analyses(insights.clone())),
        Arc::new(build_search_case_law(case_law.clone())),
        Arc::new(build_verify_citations(citation_index, grounded_verifier, event_bus)),
        Arc::new(build_search_precedents_for_charges(case_law)),
    ]
}

fn build_get_case(corpus: Arc<dyn CorpusStore>) -> Tool {
    tool("get_case", "Look up a case record by case number.")
        .param("case_number", "string")
        .build(move |args: Value| {
            let corpus = corpus.clone();
            async move {
                let cn = match args["case_number"].as_str() {
                    Some(s) => s,
                    None => return Ok(error_value("bad_input", "case_number is required")),
                };
                let case_number = match CaseNumber::new(cn) {
                    Ok(cn) => cn,
                    Err(e) => return Ok(error_value("bad_input", e)),
                };
                match corpus.get_case(&case_number).await {
                    Ok(case) => Ok(serde_json::to_value(case).unwrap_or_default()),
                    Err(e) => Ok(error_value("not_found", e)),
                }
            }
        })
}

fn build_get_case_context(corpus: Arc<dyn CorpusStore>, insights: Arc<InsightLog>) -> Tool {
    tool("get_case_context", "Get the markdown context blob for a case: charges, actors, plea, evidence, prior insights, related alerts/connections.")
        .param("case_number", "string")
        .build(move |args: Value| {
            let corpus = corpus.clone();
            let insights = insights.clone();
            async move {
                let cn = match args["case_number"].as_str() {
                    Some(s) => s,
                    None => return Ok(error_value("bad_input", "case_number is required")),
                };
                let case_number = match CaseNumber::new(cn) {
                    Ok(cn) => cn,
                    Err(e) => return Ok(error_value("bad_input", e)),
                };
                let builder = ContextBuilder::new(corpus.as_ref(), &insights);
                match builder.build_case_context(&case_number).await {
                    Ok(md) => Ok(json!({"context": md})),
                    Err(e) => Ok(error_value("not_found", e)),
                }
            }
        })
}

fn build_get_legal_context(corpus: Arc<dyn CorpusStore>, insights: Arc<InsightLog>) -> Tool {
    tool("get_legal_context", "Get a compact digest of statutes, amendments, and landmark cases relevant to a list of topic strings.")
        .param("topics", "array")
        .build(move |args: Value| {
            let corpus = corpus.clone();
            let insights = insights.clone();
            async move {
                let topics: Vec<String> = match args["topics"].as_array() {
                    Some(arr) => arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
                    None => return Ok(error_value("bad_input", "topics must be an array of strings")),
                };
                let builder = ContextBuilder::new(corpus.as_ref(), &insights);
                match builder.build_legal_context(&topics).await {
                    Ok(digest) => Ok(json!({"context": digest})),
                    Err(e) => Ok(error_value("tool_error", e)),
                }
            }
        })
}

fn build_get_alerts(corpus: Arc<dyn CorpusStore>) -> Tool {
    tool("get_alerts", "List current alerts, optionally filtered by case number and/or severity.")
        .optional_param("case_number", "string")
        .optional_param("severity", "string")
        .build(move |args: Value| {
            let corpus = corpus.clone();
            async move {
                let alerts = match corpus.list_alerts().await {
                    Ok(a) => a,
                    Err(e) => return Ok(error_value("tool_error", e)),
                };
                let case_filter = args["case_number"].as_str();
                let severity_filter = args["severity"].as_str();
                let filtered: Vec<_> = alerts
                    .into_iter()
                    .filter(|a| {
                        case_filter
                            .map(|cn| a.case_number.as_ref().map(|n| n.as_str()) == Some(cn))
                            .unwrap_or(true)
                    })
                    .filter(|a| {
                        severity_filter
                            .map(|s| format!("{:?}", a.severity).eq_ignore_ascii_case(s))
                            .unwrap_or(true)
                    })
                    .collect();
                Ok(json!({"alerts": filtered}))
            }
        })
}

fn build_get_connections(corpus: Arc<dyn CorpusStore>) -> Tool {
    tool("get_connections", "List cross-case connections, optionally filtered by case number and/or connection type.")
        .optional_param("case_number", "string")
        .optional_param("type", "string")
        .build(move |args: Value| {
            let corpus = corpus.clone();
            async move {
                let connections = match corpus.list_connections().await {
                    Ok(c) => c,
                    Err(e) => return Ok(error_value("tool_error", e)),
                };
                let case_filter = args["case_number"].as_str();
                let type_filter = args["type"].as_str();
                let filtered: Vec<_> = connections
                    .into_iter()
                    .filter(|c| {
                        case_filter
                            .map(|cn| c.case_numbers.iter().any(|n| n.as_str() == cn))
                            .unwrap_or(true)
                    })
                    .filter(|c| type_filter.map(|t| c.connection_type == t).unwrap_or(true))
                    .collect();
                Ok(json!({"connections": filtered}))
            }
        })
}

fn build_get_prior_analyses(insights: Arc<InsightLog>) -> Tool {
    tool("get_prior_analyses", "List prior completed analyses (Insights), newest first, optionally filtered by scope and/or analysis type, bounded by limit.")
        .optional_param("scope", "string")
        .optional_param("type", "string")
        .optional_param("limit", "integer")
        .build(move |args: Value| {
            let insights = insights.clone();
            async move {
                let scope = match args["scope"].as_str() {
                    None => None,
                    Some("full_caseload") => Some(Scope::FullCaseload),
                    Some(cn) => match CaseNumber::new(cn) {
                        Ok(cn) => Some(Scope::case(&cn)),
                        Err(e) => return Ok(error_value("bad_input", e)),
                    },
                };
                let analysis_type = match args["type"].as_str() {
                    None => None,
                    Some(s) => match parse_analysis_type(s) {
                        Some(t) => Some(t),
                        None => return Ok(error_value("bad_input", format!("unknown analysis type: {s}"))),
                    },
                };
                let limit = args["limit"].as_u64().map(|n| n as usize);
                match insights.list(scope, analysis_type, limit).await {
                    Ok(list) => Ok(json!({"insights": list})),
                    Err(e) => Ok(error_value("tool_error", e)),
                }
            }
        })
}

fn build_search_case_law(case_law: Arc<dyn CaseLawProvider>) -> Tool {
    tool("search_case_law", "Search for case law relevant to a query, optionally scoped to a court, via a grounded web search.")
        .param("query", "string")
        .optional_param("court", "string")
        .build(move |args: Value| {
            let case_law = case_law.clone();
            async move {
                let query = match args["query"].as_str() {
                    Some(q) => q,
                    None => return Ok(error_value("bad_input", "query is required")),
                };
                let court = args["court"].as_str();
                match case_law.search_case_law(query, court).await {
                    Ok(hits) => Ok(json!({"results": hits})),
                    Err(e) => Ok(error_value("tool_error", e)),
                }
            }
        })
}

fn build_verify_citations(
    index: Arc<LocalCitationIndex>,
    grounded: Arc<dyn GroundedVerifier>,
    event_bus: Arc<EventBus>,
) -> Tool {
    tool("verify_citations", "Verify a list of legal citations: verified / not_found / ambiguous, with a source URL when available.")
        .param("citations", "array")
        .build(move |args: Value| {
            let index = index.clone();
            let grounded = grounded.clone();
            let event_bus = event_bus.clone();
            async move {
                let citations: Vec<String> = match args["citations"].as_array() {
                    Some(arr) => arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
                    None => return Ok(error_value("bad_input", "citations must be an array of strings")),
                };
                // No per-client streaming for a direct tool invocation (unlike
                // the Citation Verifier's document pipeline, §4.7) — a throwaway
                // bus registration isn't needed here since this tool returns
                // its verdicts synchronously as the tool result.
                let _ = &event_bus;
                let mut verified = Vec::new();
                let mut unmatched = Vec::new();
                for citation in &citations {
                    if let Some(fact) = index.lookup(citation) {
                        verified.push(CitationResult {
                            citation: citation.clone(),
                            normalized: citation.clone(),
                            case_name: Some(fact.title.clone()),
                            url: None,
                            verdict: CitationVerdict::Verified,
                        });
                    } else {
                        unmatched.push(citation.clone());
                    }
                }
                if !unmatched.is_empty() {
                    match grounded.verify(&unmatched).await {
                        Ok(results) => verified.extend(results),
                        Err(e) => return Ok(error_value("tool_error", e)),
                    }
                }
                Ok(json!({"verdicts": verified}))
            }
        })
}

fn build_search_precedents_for_charges(case_law: Arc<dyn CaseLawProvider>) -> Tool {
    tool("search_precedents_for_charges", "Find precedents ranked by relevance to a list of charges.")
        .param("charges", "array")
        .build(move |args: Value| {
            let case_law = case_law.clone();
            async move {
                let charges: Vec<String> = match args["charges"].as_array() {
                    Some(arr) => arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
                    None => return Ok(error_value("bad_input", "charges must be an array of strings")),
                };
                match case_law.search_precedents_for_charges(&charges).await {
                    Ok(hits) => Ok(json!({"results": hits})),
                    Err(e) => Ok(error_value("tool_error", e)),
                }
            }
        })
}

fn parse_analysis_type(s: &str) -> Option<AnalysisType> {
    match s {
        "health_check" => Some(AnalysisType::HealthCheck),
        "deep_analysis" => Some(AnalysisType::DeepAnalysis),
        "adversarial" => Some(AnalysisType::Adversarial),
        "motion" => Some(AnalysisType::Motion),
        "evidence" => Some(AnalysisType::Evidence),
        "chat" => Some(AnalysisType::Chat),
        "hearing_prep" => Some(AnalysisType::HearingPrep),
        "client_letter" => Some(AnalysisType::ClientLetter),
        "cascade" => Some(AnalysisType::Cascade),
        _ => None,
    }
}
