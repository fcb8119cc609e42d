//! Workflow Engine (C6, §4.6): composes the Context Builder, Streaming
//! Runner, and Tool Loop into the nine named workflows, owning phase chaining
//! and the Insight Log append that terminates every run.
//!
//! `WorkflowKind` (see [`crate::event_bus::WorkflowKind`]) is the closed enum
//! the REDESIGN in spec §9 calls for; every `run_*` function here follows the
//! same shape: acquire the Request Gate (RAII guard, released even on early
//! return or panic), build context via [`crate::context_builder`], drive the
//! Streaming Runner or Tool Loop, append an Insight, and emit the workflow's
//! `<ns>_results` frame carrying the authoritative full output (§4.6
//! "Workflow-wide contract").

use crate::citation_verifier::{CitationVerifier, GroundedVerifier, LocalCitationIndex};
use crate::context_builder::ContextBuilder;
use crate::corpus::CorpusStore;
use crate::event_bus::{Event, EventBus, WorkflowKind};
use crate::insight_log::InsightLog;
use crate::models::{
    Alert, AnalysisType, CaseNumber, Connection, EvidenceItem, Insight, PriorityAction, Scope,
};
use crate::request_gate::RequestGate;
use crate::streaming_runner::StreamingRunner;
use crate::token_accountant::TokenAccountant;
use crate::tool_loop::{ToolLoop, ToolLoopConfig};
use crate::tools::Tool;
use crate::types::{CallOptions, ImageBlock, Message};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// Thinking budgets per workflow (§4.6), in tokens.
pub mod thinking_budget {
    pub const HEALTH_CHECK: u32 = 60_000;
    pub const DEEP_ANALYSIS: u32 = 40_000;
    pub const ADVERSARIAL_PHASE: u32 = 20_000;
    pub const MOTION: u32 = 20_000;
    pub const EVIDENCE: u32 = 10_000;
    pub const CHAT: u32 = 20_000;
    pub const HEARING_PREP: u32 = 8_000;
    pub const CLIENT_LETTER: u32 = 8_000;
    pub const CASCADE: u32 = 40_000;
}

/// Output cap for Motion Generation (§4.6 (4)).
pub const MOTION_OUTPUT_CAP: u32 = 64_000;

/// Extracts the first balanced `{...}` JSON object from model text, tolerant
/// of markdown code fences (§4.6 supplement, §7 ParseError, §8 S6).
pub fn extract_json_object(text: &str) -> Option<Value> {
    let stripped = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = stripped.find('{')?;
    let bytes = stripped.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &stripped[start..=i];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Wraps a workflow's raw response text with its parsed structured payload
/// when parsing succeeds, falling back to `{"response_text": raw}` otherwise
/// (§7 ParseError, §8 S6: an Insight is still written with the raw text under
/// `response_text`).
fn structured_or_raw(raw: &str) -> Value {
    match extract_json_object(raw) {
        Some(mut parsed) => {
            if let Value::Object(ref mut map) = parsed {
                map.insert("response_text".to_string(), Value::String(raw.to_string()));
            }
            parsed
        }
        None => json!({ "response_text": raw }),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthCheckResult {
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub priority_actions: Vec<PriorityAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CascadeAction {
    pub label: String,
    pub reason: String,
    pub action_type: String,
    #[serde(default)]
    pub case_number: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
}

/// The engine closes over every collaborator a workflow needs. Constructed
/// once by the server binary and shared (via `Arc`) across client sessions.
pub struct WorkflowEngine {
    pub corpus: Arc<dyn CorpusStore>,
    pub insights: Arc<InsightLog>,
    pub event_bus: Arc<EventBus>,
    pub gate: RequestGate,
    pub runner: Arc<StreamingRunner>,
    pub token_accountant: Arc<TokenAccountant>,
    pub tools: Vec<Arc<Tool>>,
    pub citation_index: Arc<LocalCitationIndex>,
    pub grounded_verifier: Arc<dyn GroundedVerifier>,
    pub chat_sessions: Mutex<std::collections::HashMap<String, Vec<Message>>>,
    pub base_options: CallOptions,
}

impl WorkflowEngine {
    fn context_builder(&self) -> ContextBuilder<'_> {
        ContextBuilder::new(self.corpus.as_ref(), &self.insights)
    }

    fn call_options(&self, system_prompt: String, thinking_budget: u32, max_output_tokens: u32) -> Result<CallOptions> {
        CallOptions::builder()
            .system_prompt(system_prompt)
            .model(self.base_options.model())
            .base_url(self.base_options.base_url())
            .api_key(self.base_options.api_key())
            .thinking_budget(thinking_budget)
            .max_output_tokens(max_output_tokens)
            .temperature(self.base_options.temperature())
            .timeout(self.base_options.timeout())
            .build()
    }

    /// §4.11: `analysis_error {message: "busy"}` on gate contention, no state
    /// change. Every workflow entry point goes through this.
    fn acquire_gate(&self, client: &str) -> Option<crate::request_gate::GateGuard> {
        match self.gate.try_acquire(client) {
            Some(guard) => Some(guard),
            None => {
                self.event_bus.emit(client, Event::AnalysisError { message: "busy".to_string() });
                None
            }
        }
    }

    // ---- 1. Health Check (§4.6 (1)) ----------------------------------

    pub async fn run_health_check(&self, client: &str, cancel: &AtomicBool) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::HealthCheck;

        let context = match self.context_builder().build_full_caseload_context().await {
            Ok(c) => c,
            Err(e) => {
                self.event_bus.emit(client, Event::Error { namespace: crate::event_bus::namespace_for(ns), message: e.to_string() });
                return Err(e);
            }
        };

        let system_prompt = "You are a caseload health-check analyst for a public defender. \
            Review the full caseload and produce a JSON object with keys \"alerts\", \
            \"connections\", and \"priority_actions\" as described in the schema."
            .to_string();
        let options = self.call_options(system_prompt, thinking_budget::HEALTH_CHECK, 16_000)?;
        let messages = vec![Message::user(context)];

        let outcome = self.runner.run(&options, &messages, ns, client, cancel).await;
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => return Err(e),
        };

        let raw = outcome.blocks.iter().find_map(|b| match b {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        }).unwrap_or_default();

        let payload = structured_or_raw(&raw);
        let result: HealthCheckResult = serde_json::from_value(payload.clone()).unwrap_or_default();

        self.corpus
            .replace_health_check_output(
                result.alerts.clone(),
                result.connections.clone(),
                result.priority_actions.clone(),
            )
            .await?;

        self.insights
            .append(AnalysisType::HealthCheck, Scope::FullCaseload, payload.clone())
            .await?;

        self.event_bus.emit(
            client,
            Event::Results { namespace: crate::event_bus::namespace_for(ns), payload },
        );
        Ok(())
    }

    // ---- 2. Deep Case Analysis (§4.6 (2)) ----------------------------

    pub async fn run_deep_analysis(&self, client: &str, case_number: &CaseNumber, cancel: &AtomicBool) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::DeepAnalysis;

        if self.corpus.get_case(case_number).await.is_err() {
            self.event_bus.emit(client, Event::AnalysisError { message: format!("case not found: {case_number}") });
            return Err(Error::not_found(case_number.as_str()));
        }

        let case_context = self.context_builder().build_case_context(case_number).await?;
        let system_prompt = "You are conducting a deep legal analysis of a single case for a \
            public defender. Produce a structured assessment: executive summary, \
            prosecution-strength score (0-100), key facts, defense strategies, evidence \
            analysis, constitutional issues, witness analysis, plea recommendation with \
            conviction probability, recommended motions, action timeline, and overall \
            assessment, as a single JSON object.".to_string();
        let options = self.call_options(system_prompt, thinking_budget::DEEP_ANALYSIS, 16_000)?;
        let messages = vec![Message::user(case_context)];

        let outcome = self.runner.run(&options, &messages, ns, client, cancel).await?;
        let raw = outcome.blocks.iter().find_map(|b| match b {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        }).unwrap_or_default();

        let payload = structured_or_raw(&raw);
        self.insights.append(AnalysisType::DeepAnalysis, Scope::case(case_number), payload.clone()).await?;
        self.event_bus.emit(client, Event::Results { namespace: crate::event_bus::namespace_for(ns), payload });
        Ok(())
    }

    // ---- 3. Adversarial Simulation (§4.6 (3), §8 S4) -----------------

    pub async fn run_adversarial(&self, client: &str, case_number: &CaseNumber, cancel: &AtomicBool) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };

        if self.corpus.get_case(case_number).await.is_err() {
            self.event_bus.emit(client, Event::AnalysisError { message: format!("case not found: {case_number}") });
            return Err(Error::not_found(case_number.as_str()));
        }

        let case_context = self.context_builder().build_case_context(case_number).await?;

        // Phase P1 — prosecution. Failure here aborts P2/P3 (§9 "Partial-failure phases").
        self.event_bus.emit(client, Event::AdversarialPhase { phase: "prosecution", phase_number: 1 });
        let p1_prompt = format!(
            "{case_context}\n\nYou are the prosecutor. Present the state's strongest argument \
             for conviction on this case."
        );
        let p1_options = self.call_options(
            "You are a skilled prosecutor building the strongest case for conviction.".to_string(),
            thinking_budget::ADVERSARIAL_PHASE,
            8_000,
        )?;
        let p1 = self
            .runner
            .run(&p1_options, &[Message::user(p1_prompt)], WorkflowKind::Prosecution, client, cancel)
            .await
            .map_err(|e| {
                self.event_bus.emit(client, Event::Error { namespace: "prosecution", message: e.to_string() });
                e
            })?;
        let p1_text = p1.blocks.iter().map(|b| if let crate::types::ContentBlock::Text(t) = b { t.text.clone() } else { String::new() }).collect::<String>();

        // Phase P2 — defense. Prompt includes P1's full text verbatim (§8 S4).
        self.event_bus.emit(client, Event::AdversarialPhase { phase: "defense", phase_number: 2 });
        let p2_prompt = format!(
            "{case_context}\n\n## Prosecution's argument\n{p1_text}\n\nYou are the defense \
             attorney. Dismantle the prosecution's argument above point by point."
        );
        let p2_options = self.call_options(
            "You are a skilled defense attorney dismantling the prosecution's case.".to_string(),
            thinking_budget::ADVERSARIAL_PHASE,
            8_000,
        )?;
        let p2 = self
            .runner
            .run(&p2_options, &[Message::user(p2_prompt)], WorkflowKind::Defense, client, cancel)
            .await
            .map_err(|e| {
                self.event_bus.emit(client, Event::Error { namespace: "defense", message: e.to_string() });
                e
            })?;
        let p2_text = p2.blocks.iter().map(|b| if let crate::types::ContentBlock::Text(t) = b { t.text.clone() } else { String::new() }).collect::<String>();

        // Phase P3 — judge. Prompt includes both P1 and P2 verbatim (§8 S4).
        self.event_bus.emit(client, Event::AdversarialPhase { phase: "judge", phase_number: 3 });
        let p3_prompt = format!(
            "{case_context}\n\n## Prosecution's argument\n{p1_text}\n\n## Defense's rebuttal\n{p2_text}\n\n\
             You are an objective judge. Synthesize both arguments into a balanced assessment."
        );
        let p3_options = self.call_options(
            "You are an objective judge synthesizing both sides of the case.".to_string(),
            thinking_budget::ADVERSARIAL_PHASE,
            8_000,
        )?;
        let p3 = self
            .runner
            .run(&p3_options, &[Message::user(p3_prompt)], WorkflowKind::Judge, client, cancel)
            .await
            .map_err(|e| {
                self.event_bus.emit(client, Event::Error { namespace: "judge", message: e.to_string() });
                e
            })?;
        let p3_text = p3.blocks.iter().map(|b| if let crate::types::ContentBlock::Text(t) = b { t.text.clone() } else { String::new() }).collect::<String>();

        let payload = json!({
            "prosecution": p1_text,
            "defense": p2_text,
            "judge": p3_text,
        });
        self.insights.append(AnalysisType::Adversarial, Scope::case(case_number), payload.clone()).await?;
        self.event_bus.emit(client, Event::Results { namespace: "judge", payload });
        Ok(())
    }

    // ---- 4. Motion Generation (§4.6 (4)) ------------------------------

    pub async fn run_motion_generation(
        &self,
        client: &str,
        case_number: &CaseNumber,
        motion_type: &str,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::Motion;

        if self.corpus.get_case(case_number).await.is_err() {
            self.event_bus.emit(client, Event::AnalysisError { message: format!("case not found: {case_number}") });
            return Err(Error::not_found(case_number.as_str()));
        }

        let case_context = self.context_builder().build_case_context(case_number).await?;
        let legal_context = self
            .context_builder()
            .build_legal_context(&[motion_type.to_string()])
            .await?;
        let prompt = format!("{case_context}\n\n## Relevant law\n{legal_context}\n\nDraft a {motion_type}.");

        let system_prompt = format!(
            "You are drafting a {motion_type} for a public defender's client. Cite statutes \
             and case law precisely using standard legal citation format."
        );
        let options = self.call_options(system_prompt, thinking_budget::MOTION, MOTION_OUTPUT_CAP)?;
        let outcome = self.runner.run(&options, &[Message::user(prompt)], ns, client, cancel).await?;
        let motion_text = outcome.blocks.iter().find_map(|b| match b {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        }).unwrap_or_default();

        let payload = json!({ "response_text": motion_text, "motion_type": motion_type });
        self.insights.append(AnalysisType::Motion, Scope::case(case_number), payload.clone()).await?;
        self.event_bus.emit(client, Event::Results { namespace: crate::event_bus::namespace_for(ns), payload });

        // Citation Verifier triggers automatically on completion (§4.6 (4));
        // it emits its own `citation_verification_started`/`_results` frames,
        // including the `{error, local_citations}` degrade shape (§4.7 step 4).
        let verifier = CitationVerifier::new(&self.citation_index, self.grounded_verifier.as_ref(), &self.event_bus);
        let _ = verifier.verify_document(client, &motion_text).await;
        Ok(())
    }

    // ---- 5. Evidence Analysis (§4.6 (5)) ------------------------------

    pub async fn run_evidence_analysis(
        &self,
        client: &str,
        case_number: &CaseNumber,
        evidence_id: &str,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::Evidence;

        let items = self.corpus.get_evidence(case_number).await?;
        let item = items
            .into_iter()
            .find(|i| i.id == evidence_id)
            .ok_or_else(|| Error::not_found(evidence_id))?;

        if let Err(e) = self.run_evidence_inner(client, &item, cancel, ns).await {
            self.event_bus.emit(client, Event::AnalysisError { message: e.to_string() });
            return Err(e);
        }
        Ok(())
    }

    async fn run_evidence_inner(
        &self,
        client: &str,
        item: &EvidenceItem,
        cancel: &AtomicBool,
        ns: WorkflowKind,
    ) -> Result<()> {
        let system_prompt = "You are analyzing a piece of case evidence for a public defender. \
            Describe what is visible/relevant and its significance to the defense."
            .to_string();
        let options = self.call_options(system_prompt, thinking_budget::EVIDENCE, 8_000)?;

        // Multimodal call when an image (or video poster) is available;
        // falls back to a text-only call over the evidence record otherwise
        // (§4.6 (5)).
        let image_path = item.media_path.as_deref().or(item.poster_path.as_deref());
        let messages = match image_path {
            Some(path) if path.starts_with("http://") || path.starts_with("https://") || path.starts_with("data:") => {
                let image = ImageBlock::from_url(path)?;
                vec![Message::user_with_image(
                    format!("Evidence: {} ({:?})\n{}", item.title, item.evidence_type, item.description.clone().unwrap_or_default()),
                    image,
                )]
            }
            _ => vec![Message::user(format!(
                "Evidence record (no media file available): {} ({:?})\n{}",
                item.title,
                item.evidence_type,
                item.description.clone().unwrap_or_default()
            ))],
        };

        let outcome = self.runner.run(&options, &messages, ns, client, cancel).await?;
        let raw = outcome.blocks.iter().find_map(|b| match b {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        }).unwrap_or_default();

        let payload = json!({ "response_text": raw, "evidence_id": item.id });
        self.insights.append(AnalysisType::Evidence, Scope::case(&item.case_number), payload.clone()).await?;
        self.event_bus.emit(client, Event::Results { namespace: crate::event_bus::namespace_for(ns), payload });
        Ok(())
    }

    // ---- 6. Caseload Chat (§4.6 (6)) ----------------------------------

    pub async fn run_chat_message(&self, client: &str, message: &str, cancel: &AtomicBool) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::Chat;

        let full_context = self.context_builder().build_full_caseload_context().await?;

        let mut history = {
            let mut sessions = self.chat_sessions.lock().expect("chat session lock poisoned");
            sessions.entry(client.to_string()).or_default().clone()
        };
        history.push(Message::user(message));

        let truncated = crate::context::truncate_messages(&history, 40, true);
        let system_prompt = format!(
            "You are a caseload analyst assistant for a public defender. Use the full caseload \
             context below to answer questions.\n\n{full_context}"
        );
        let options = self.call_options(system_prompt, thinking_budget::CHAT, 8_000)?;

        let outcome = self.runner.run(&options, &truncated, ns, client, cancel).await?;
        let raw = outcome.blocks.iter().find_map(|b| match b {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        }).unwrap_or_default();

        history.push(Message::assistant(outcome.blocks.clone()));
        {
            let mut sessions = self.chat_sessions.lock().expect("chat session lock poisoned");
            sessions.insert(client.to_string(), history);
        }

        let payload = json!({ "response_text": raw });
        self.event_bus.emit(client, Event::Results { namespace: crate::event_bus::namespace_for(ns), payload });
        Ok(())
    }

    pub fn clear_chat(&self, client: &str) {
        let mut sessions = self.chat_sessions.lock().expect("chat session lock poisoned");
        sessions.remove(client);
    }

    // ---- 7. Hearing Prep Brief (§4.6 (7)) ------------------------------

    pub async fn run_hearing_prep(&self, client: &str, case_number: &CaseNumber, cancel: &AtomicBool) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::HearingPrep;

        if self.corpus.get_case(case_number).await.is_err() {
            self.event_bus.emit(client, Event::AnalysisError { message: format!("case not found: {case_number}") });
            return Err(Error::not_found(case_number.as_str()));
        }

        let case_context = self.context_builder().build_case_context(case_number).await?;
        let system_prompt = "Produce a concise hearing prep brief: key talking points, \
            anticipated questions, and a recommended posture.".to_string();
        let options = self.call_options(system_prompt, thinking_budget::HEARING_PREP, 4_000)?;
        let outcome = self.runner.run(&options, &[Message::user(case_context)], ns, client, cancel).await?;
        let raw = outcome.blocks.iter().find_map(|b| match b {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        }).unwrap_or_default();

        let payload = json!({ "response_text": raw });
        self.insights.append(AnalysisType::HearingPrep, Scope::case(case_number), payload.clone()).await?;
        self.event_bus.emit(client, Event::Results { namespace: crate::event_bus::namespace_for(ns), payload });
        Ok(())
    }

    // ---- 8. Client Letter (§4.6 (8)) -----------------------------------

    pub async fn run_client_letter(&self, client: &str, case_number: &CaseNumber, cancel: &AtomicBool) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::ClientLetter;

        if self.corpus.get_case(case_number).await.is_err() {
            self.event_bus.emit(client, Event::AnalysisError { message: format!("case not found: {case_number}") });
            return Err(Error::not_found(case_number.as_str()));
        }

        let case_context = self.context_builder().build_case_context(case_number).await?;
        let system_prompt = "Rewrite this case in plain language a client without legal \
            training can understand. Plain text only, no legal jargon.".to_string();
        let options = self.call_options(system_prompt, thinking_budget::CLIENT_LETTER, 4_000)?;
        let outcome = self.runner.run(&options, &[Message::user(case_context)], ns, client, cancel).await?;
        let raw = outcome.blocks.iter().find_map(|b| match b {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        }).unwrap_or_default();

        let payload = json!({ "response_text": raw });
        self.insights.append(AnalysisType::ClientLetter, Scope::case(case_number), payload.clone()).await?;
        self.event_bus.emit(client, Event::Results { namespace: crate::event_bus::namespace_for(ns), payload });
        Ok(())
    }

    // ---- Ad-hoc Widget (§6 `create_widget`) ---------------------------

    /// Free-form, user-requested markdown widget over the full caseload
    /// context. Unlike the nine named workflows this has no `AnalysisType`
    /// variant of its own (§3 "closed enum of the nine Workflow Engine
    /// outputs"), so its result is pushed to the Event Bus but never appended
    /// to the Insight Log.
    pub async fn run_create_widget(&self, client: &str, request: &str, cancel: &AtomicBool) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::Widget;

        let full_context = self.context_builder().build_full_caseload_context().await?;
        let system_prompt = "You are producing an ad-hoc markdown widget for a public defender \
            reviewing their caseload. Respond with a single, self-contained markdown document \
            answering the request below using the caseload context provided."
            .to_string();
        let options = self.call_options(system_prompt, 0, 4_000)?;
        let prompt = format!("{full_context}\n\n## Request\n{request}");

        let outcome = self.runner.run(&options, &[Message::user(prompt)], ns, client, cancel).await?;
        let raw = outcome.blocks.iter().find_map(|b| match b {
            crate::types::ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        }).unwrap_or_default();

        let payload = json!({ "response_text": raw });
        self.event_bus.emit(client, Event::Results { namespace: crate::event_bus::namespace_for(ns), payload });
        Ok(())
    }

    // ---- 9. Cascade Intelligence (§4.6 (9), §8 S3) --------------------

    pub async fn run_cascade(&self, client: &str, cancel: &AtomicBool) -> Result<()> {
        let Some(_guard) = self.acquire_gate(client) else { return Ok(()) };
        let ns = WorkflowKind::Cascade;

        let system_prompt = "You are an autonomous investigator reviewing an entire public \
            defender caseload. Use the tools available to you to identify systemic issues, \
            cross-case patterns, and high-value actions. When you are done, summarize your \
            findings and propose an actions list as JSON: \
            [{\"label\", \"reason\", \"action_type\", \"case_number\"?, \"urgency\"}].".to_string();

        let tool_loop = ToolLoop::new(
            self.runner.clone(),
            self.event_bus.clone(),
            self.tools.clone(),
            crate::hooks::Hooks::new(),
            ToolLoopConfig::default(),
        );

        let outcome = tool_loop
            .run(
                &self.call_options(system_prompt.clone(), thinking_budget::CASCADE, 8_000)?,
                &system_prompt,
                "Begin your investigation of the caseload.",
                ns,
                client,
                cancel,
            )
            .await?;

        let actions: Vec<CascadeAction> = extract_json_array(&outcome.final_text).unwrap_or_default();
        let payload = json!({
            "response_text": outcome.final_text,
            "actions": actions,
            "rounds": outcome.rounds,
        });
        self.insights.append(AnalysisType::Cascade, Scope::FullCaseload, payload.clone()).await?;
        self.event_bus.emit(client, Event::Results { namespace: crate::event_bus::namespace_for(ns), payload });
        Ok(())
    }
}

/// Extracts a top-level JSON array of actions from the cascade's final text,
/// tolerant of surrounding prose the model emitted around it (§4.6 (9)).
fn extract_json_array(text: &str) -> Option<Vec<CascadeAction>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_object_handles_code_fences() {
        let text = "```json\n{\"a\": 1, \"b\": [1,2]}\n```";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extract_json_object_returns_none_for_plain_text() {
        assert!(extract_json_object("hello, this is not json").is_none());
    }

    #[test]
    fn structured_or_raw_falls_back_to_response_text() {
        let payload = structured_or_raw("hello");
        assert_eq!(payload["response_text"], "hello");
    }

    #[test]
    fn structured_or_raw_preserves_parsed_fields_and_keeps_raw_text() {
        let payload = structured_or_raw("{\"alerts\": []}");
        assert!(payload["alerts"].is_array());
        assert_eq!(payload["response_text"], "{\"alerts\": []}");
    }

    #[test]
    fn extract_json_array_finds_actions_list() {
        let text = "Here is my plan:\n[{\"label\": \"review\", \"reason\": \"x\", \"action_type\": \"review\"}]\nDone.";
        let actions = extract_json_array(text).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].label, "review");
    }

    #[test]
    fn extract_json_object_handles_nested_braces_in_strings() {
        let text = "{\"note\": \"contains a { brace } inside a string\", \"n\": 1}";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["n"], 1);
    }
}
