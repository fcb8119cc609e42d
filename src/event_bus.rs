//! Event Bus (C8, §4.8): per-client push channel carrying JSON frames.
//!
//! REDESIGN (§9 "Dynamic, per-workflow event namespaces"): the source leans
//! on runtime string prefixes (`format!("{}_thinking_delta", ns)` at each call
//! site). Here [`WorkflowKind`] is a closed enum and [`namespace_for`] is a
//! total, deterministic function computed once; every event frame carries its
//! namespace as a struct field rather than being assembled from a
//! runtime-concatenated event-name string.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::models::TokenTally;

/// Closed enum of the nine workflows (§4.6), doubling as the Event Bus
/// namespace key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    HealthCheck,
    DeepAnalysis,
    Prosecution,
    Defense,
    Judge,
    Motion,
    Evidence,
    Chat,
    HearingPrep,
    ClientLetter,
    Cascade,
    Widget,
}

/// Total function from workflow kind to its wire namespace (§4.8, §9).
pub const fn namespace_for(kind: WorkflowKind) -> &'static str {
    match kind {
        WorkflowKind::HealthCheck => "health_check",
        WorkflowKind::DeepAnalysis => "deep_analysis",
        WorkflowKind::Prosecution => "prosecution",
        WorkflowKind::Defense => "defense",
        WorkflowKind::Judge => "judge",
        WorkflowKind::Motion => "motion",
        WorkflowKind::Evidence => "evidence",
        WorkflowKind::Chat => "chat",
        WorkflowKind::HearingPrep => "hearing_prep",
        WorkflowKind::ClientLetter => "client_letter",
        WorkflowKind::Cascade => "cascade",
        WorkflowKind::Widget => "widget",
    }
}

/// One client-visible push frame. Serializes to `{event, namespace, ...fields}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ThinkingStarted { namespace: &'static str },
    ThinkingDelta { namespace: &'static str, text: String },
    ThinkingComplete { namespace: &'static str },
    ResponseStarted { namespace: &'static str },
    ResponseDelta { namespace: &'static str, text: String },
    ResponseComplete { namespace: &'static str, full_text: String, truncated: bool },
    ToolCall {
        namespace: &'static str,
        tool_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
        status: &'static str,
    },
    ToolResult {
        namespace: &'static str,
        tool_id: String,
        tool_name: String,
        result_preview: String,
        result_length: usize,
    },
    Results { namespace: &'static str, payload: serde_json::Value },
    Error { namespace: &'static str, message: String },
    AdversarialPhase { phase: &'static str, phase_number: u8 },
    CitationVerificationStarted,
    CitationVerificationResults { payload: serde_json::Value },
    TokenUpdate { tally: TokenTally },
    CaseloadLoaded { count: usize },
    MemoryLoaded { count: usize },
    LegalCorpusLoaded { count: usize },
    Status { message: String },
    AnalysisError { message: String },
}

pub type ClientId = String;

/// Per-client delivery. A single mutex guards the registration map; it is
/// held only for the lookup+send, matching the Token Accountant's "mutex held
/// only for the duration of..." pattern (§9).
#[derive(Default)]
pub struct EventBus {
    channels: Mutex<HashMap<ClientId, mpsc::UnboundedSender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client and returns the receiving half of its channel.
    pub fn register(&self, client: ClientId) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        channels.insert(client, tx);
        rx
    }

    pub fn unregister(&self, client: &str) {
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        channels.remove(client);
    }

    /// Delivers `event` to `client`. Silently drops if the client has
    /// disconnected (channel closed or never registered) — per §5, a dead
    /// channel emits no further events rather than erroring the workflow.
    pub fn emit(&self, client: &str, event: Event) {
        let channels = self.channels.lock().expect("event bus lock poisoned");
        if let Some(tx) = channels.get(client) {
            let _ = tx.send(event);
        }
    }

    pub fn broadcast(&self, event: Event) {
        let channels = self.channels.lock().expect("event bus lock poisoned");
        for tx in channels.values() {
            let _ = tx.send(event.clone());
        }
    }
}
