//! Context Builder (C2, §4.2): assembles the shared textual corpus stitched
//! into every workflow prompt.
//!
//! Context text is deterministic given its inputs — no hidden time/random
//! state (§4.2 invariant). `build_full_caseload_context` writes into a single
//! pre-allocated `String` rather than collecting a `Vec<String>` and joining,
//! so the ~275K-token caseload is never materialized twice.

use crate::corpus::CorpusStore;
use crate::insight_log::InsightLog;
use crate::models::CaseNumber;
use crate::Result;
use std::fmt::Write as _;

/// Digest cap for `build_legal_context` (§4.2).
pub const LEGAL_CONTEXT_TOKEN_CAP: usize = 30_000;

/// Default recall window for `build_memory_context` (§4.2).
pub const MEMORY_LIMIT: usize = 5;

const SEPARATOR: &str = "\n\n---\n\n";

pub struct ContextBuilder<'a> {
    corpus: &'a dyn CorpusStore,
    insights: &'a InsightLog,
    memory_limit: usize,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(corpus: &'a dyn CorpusStore, insights: &'a InsightLog) -> Self {
        Self {
            corpus,
            insights,
            memory_limit: MEMORY_LIMIT,
        }
    }

    /// Override the memory recall window. Exposed for tests that want a
    /// caseload with more history than `MEMORY_LIMIT` would show.
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// `build_full_caseload_context` (§4.2): every case's markdown rendering,
    /// in case_number ascending order, joined by a stable separator.
    pub async fn build_full_caseload_context(&self) -> Result<String> {
        let case_numbers = self.corpus.all_case_numbers().await?;
        // Row count gives a capacity hint so the buffer doesn't reallocate
        // repeatedly across ~500 cases.
        let mut out = String::with_capacity(case_numbers.len() * 600);
        for (i, cn) in case_numbers.iter().enumerate() {
            if i > 0 {
                out.push_str(SEPARATOR);
            }
            let md = self.corpus.get_case_markdown(cn).await?;
            out.push_str(&md);
        }
        Ok(out)
    }

    /// `build_case_context` (§4.2): the focal case plus scoped prior insights
    /// (newest first) plus any caseload-wide alerts/connections mentioning it.
    pub async fn build_case_context(&self, case_number: &CaseNumber) -> Result<String> {
        let mut out = self.corpus.get_case_markdown(case_number).await?;

        let memory = self.build_memory_context(&crate::models::Scope::case(case_number)).await?;
        if !memory.is_empty() {
            out.push_str(SEPARATOR);
            out.push_str(&memory);
        }

        let alerts = self.corpus.list_alerts().await?;
        let relevant_alerts: Vec<_> = alerts
            .iter()
            .filter(|a| a.case_number.as_ref() == Some(case_number))
            .collect();
        if !relevant_alerts.is_empty() {
            out.push_str(SEPARATOR);
            let _ = writeln!(out, "## Related Alerts");
            for alert in relevant_alerts {
                let _ = writeln!(out, "- [{:?}] {}: {}", alert.severity, alert.title, alert.message);
            }
        }

        let connections = self.corpus.list_connections().await?;
        let relevant_connections: Vec<_> = connections
            .iter()
            .filter(|c| c.case_numbers.contains(case_number))
            .collect();
        if !relevant_connections.is_empty() {
            out.push_str(SEPARATOR);
            let _ = writeln!(out, "## Related Connections");
            for connection in relevant_connections {
                let _ = writeln!(out, "- {}: {}", connection.title, connection.description);
            }
        }

        Ok(out)
    }

    /// `build_legal_context` (§4.2): a compact digest of statutes, amendments,
    /// and landmark cases relevant to `topics`, capped at
    /// [`LEGAL_CONTEXT_TOKEN_CAP`] tokens (character-approximated, §4 ambient
    /// estimation helper in `context::estimate_tokens`).
    pub async fn build_legal_context(&self, topics: &[String]) -> Result<String> {
        let mut out = String::new();
        for topic in topics {
            let facts = self
                .corpus
                .search_legal(&crate::models::LegalFilter {
                    term: topic.clone(),
                    jurisdiction: None,
                })
                .await?;
            for fact in facts {
                let entry = format!(
                    "### {} ({})\n{}\n{}\n\n",
                    fact.title,
                    fact.citation_token,
                    fact.holding,
                    fact.summary.clone().unwrap_or_default()
                );
                // Cap by approximate tokens (4 chars/token) rather than raw bytes.
                if (out.len() + entry.len()) / 4 > LEGAL_CONTEXT_TOKEN_CAP {
                    return Ok(out);
                }
                out.push_str(&entry);
            }
        }
        Ok(out)
    }

    /// `build_memory_context` (§4.2): up to `memory_limit` most recent
    /// insights for `scope`, newest first, rendered with type/timestamp/payload.
    pub async fn build_memory_context(&self, scope: &crate::models::Scope) -> Result<String> {
        let insights = self
            .insights
            .list(Some(scope.clone()), None, Some(self.memory_limit))
            .await?;
        if insights.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::new();
        let _ = writeln!(out, "## Prior Insights");
        for insight in insights {
            let _ = writeln!(
                out,
                "- [{:?} @ {}] {}",
                insight.analysis_type,
                insight.timestamp,
                condensed_payload(&insight.result)
            );
        }
        Ok(out)
    }
}

fn condensed_payload(value: &serde_json::Value) -> String {
    let rendered = value.to_string();
    if rendered.len() > 400 {
        let cut = rendered.char_indices().nth(400).map(|(i, _)| i).unwrap_or(rendered.len());
        format!("{}...", &rendered[..cut])
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::InMemoryCorpusStore;
    use crate::insight_log::InsightLog;
    use crate::models::{AnalysisType, Case, CaseStatus, Scope, Severity};

    fn sample_case(cn: &str) -> Case {
        Case {
            case_number: CaseNumber::new(cn).unwrap(),
            defendant: "Doe, J.".to_string(),
            severity: Severity::Felony,
            status: CaseStatus::Open,
            charges: vec!["DUI".to_string()],
            filing_date: None,
            arrest_date: None,
            hearing_date: None,
            officer: None,
            judge: None,
            prosecutor: None,
            witnesses: vec![],
            bond: None,
            plea_offer: None,
            prior_record: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn full_caseload_context_orders_and_separates() {
        let corpus = InMemoryCorpusStore::new();
        corpus.seed_case(sample_case("B2"));
        corpus.seed_case(sample_case("A1"));
        let insights = InsightLog::new();

        let builder = ContextBuilder::new(&corpus, &insights);
        let context = builder.build_full_caseload_context().await.unwrap();

        let a1_pos = context.find("A1").unwrap();
        let b2_pos = context.find("B2").unwrap();
        assert!(a1_pos < b2_pos);
        assert!(context.contains(SEPARATOR));
    }

    #[tokio::test]
    async fn case_context_includes_memory() {
        let corpus = InMemoryCorpusStore::new();
        corpus.seed_case(sample_case("A1"));
        let insights = InsightLog::new();
        let cn = CaseNumber::new("A1").unwrap();
        insights
            .append(AnalysisType::DeepAnalysis, Scope::case(&cn), serde_json::json!({"summary": "x"}))
            .await
            .unwrap();

        let builder = ContextBuilder::new(&corpus, &insights);
        let context = builder.build_case_context(&cn).await.unwrap();
        assert!(context.contains("Prior Insights"));
    }

    #[tokio::test]
    async fn legal_context_empty_for_no_matches() {
        let corpus = InMemoryCorpusStore::new();
        let insights = InsightLog::new();
        let builder = ContextBuilder::new(&corpus, &insights);
        let context = builder
            .build_legal_context(&["nonexistent-topic".to_string()])
            .await
            .unwrap();
        assert!(context.is_empty());
    }
}
