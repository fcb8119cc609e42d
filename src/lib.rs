//! # Case Nexus
//!
//! An interactive caseload-analysis orchestrator for long-context LLMs,
//! built for public defender offices carrying hundreds of simultaneous
//! cases. A single model call can hold an entire caseload in context; Case
//! Nexus is the Rust service that assembles that context, drives the
//! streaming call, lets the model use tools to pull in specifics, and
//! pushes the result to connected clients over a per-client event channel.
//!
//! ## Key Features
//!
//! - **Full-caseload context**: every case's markdown rendering, evidence,
//!   alerts, and connections assembled into one prompt (Context Builder).
//! - **Interleaved thinking**: the model's reasoning trace streams as its
//!   own channel, separate from its visible response (Streaming Runner).
//! - **Agentic tool use**: a bounded, round-counted loop lets the model pull
//!   case records, legal context, and case law on demand (Tool Loop, Tool
//!   Registry).
//! - **Nine workflows**: health check, deep case analysis, adversarial
//!   simulation, motion generation, evidence analysis, caseload chat,
//!   hearing prep, client letters, and an autonomous cascade investigation
//!   (Workflow Engine).
//! - **Grounded citation verification**: legal citations are checked against
//!   a local index first, falling back to a grounded search only for what's
//!   unmatched (Citation Verifier).
//! - **Per-client event streaming**: every workflow pushes incremental
//!   frames to its caller over a namespaced channel (Event Bus).
//!
//! ## Example
//!
//! ```rust,no_run
//! use case_nexus::{CallOptions, Message, StreamingRunner, EventBus, TokenAccountant, WorkflowKind};
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let event_bus = Arc::new(EventBus::new());
//!     let accountant = Arc::new(TokenAccountant::new());
//!     let runner = StreamingRunner::new(event_bus.clone(), accountant);
//!
//!     let options = CallOptions::builder()
//!         .system_prompt("You are a caseload analyst.")
//!         .model("claude-long-context")
//!         .base_url("https://api.anthropic.com/v1")
//!         .api_key("sk-...")
//!         .build()?;
//!
//!     let mut rx = event_bus.register("client-1".to_string());
//!     let cancel = AtomicBool::new(false);
//!     let _outcome = runner
//!         .run(&options, &[Message::user("Summarize the caseload.")], WorkflowKind::Chat, "client-1", &cancel)
//!         .await?;
//!     while let Ok(event) = rx.try_recv() {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **models**: the data model — cases, evidence, legal facts, alerts,
//!   connections, insights, token tallies.
//! - **corpus**: the Corpus Store (C1), a read interface over cases and
//!   legal facts shared by every other module.
//! - **context_builder**: the Context Builder (C2), assembling prompt text
//!   from the corpus and prior insights.
//! - **tools** / **tool_registry**: the generic `Tool`/`ToolBuilder`
//!   abstraction and the nine domain tools built on it (C3).
//! - **streaming_runner**: the Streaming Runner (C4), driving one provider
//!   call and forwarding deltas to the Event Bus.
//! - **tool_loop**: the Tool Loop (C5), the bounded agentic executor.
//! - **workflows**: the Workflow Engine (C6), composing the above into the
//!   nine named workflows.
//! - **citation_verifier**: the Citation Verifier (C7).
//! - **event_bus**: the Event Bus (C8), per-client push channels.
//! - **insight_log**: the Insight Log (C9), append-only analysis history.
//! - **token_accountant**: the Token Accountant (C10), process-wide tallies.
//! - **request_gate**: the Request Gate (C11), one in-flight workflow per
//!   client.
//! - **db**: sqlite-backed persistence for the Corpus Store and Insight Log.
//! - **config**: environment-driven provider configuration.
//! - **error**: the `Error` enum and `Result<T>` alias.
//! - **context**: token estimation and chat-history truncation.
//! - **hooks**: lifecycle hooks around tool dispatch.
//! - **retry**: exponential backoff for the external case-law/citation calls.
//! - **time**: a clock-abstraction seam for deterministic Insight timestamps.

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Environment-driven resolution of the provider API key, base URL, model,
/// and optional web-search key.
mod config;

/// Turn-history estimation and truncation helpers for the Caseload Chat
/// workflow.
mod context;

/// Error types and conversions used across the crate.
mod error;

/// Lifecycle hooks fired around Tool Loop dispatch.
mod hooks;

/// Tool definition and execution system with automatic JSON schema
/// generation, shared by every domain tool in [`tool_registry`].
mod tools;

/// Core type definitions: call configuration, conversation segments, and the
/// Messages-style wire format.
mod types;

/// Internal utilities for provider stream parsing and content-block
/// aggregation.
mod utils;

/// The data model: cases, evidence, legal facts, alerts, connections,
/// insights, token tallies.
pub mod models;

/// Corpus Store (C1): read access to cases, evidence, legal facts, and the
/// latest health-check output.
pub mod corpus;

/// Sqlite-backed persistence for the Corpus Store and Insight Log.
pub mod db;

/// Context Builder (C2): assembles the prompt text stitched into every
/// workflow.
pub mod context_builder;

/// Tool Registry (C3): the nine domain tools exposed to the agent.
pub mod tool_registry;

/// Streaming Runner (C4): drives one LLM call over the wire format.
pub mod streaming_runner;

/// Tool Loop (C5): the bounded, event-emitting agentic executor.
pub mod tool_loop;

/// Workflow Engine (C6): the nine named workflows.
pub mod workflows;

/// Citation Verifier (C7): local-index-first legal citation verification.
pub mod citation_verifier;

/// Event Bus (C8): per-client push channels carrying JSON frames.
pub mod event_bus;

/// Insight Log (C9): append-only analysis history.
pub mod insight_log;

/// Token Accountant (C10): process-wide cumulative token tallies.
pub mod token_accountant;

/// Request Gate (C11): at most one active workflow per client.
pub mod request_gate;

/// Clock abstraction so the Insight Log stays deterministic under test.
pub mod time;

/// Retry utilities with exponential backoff and jitter, used by the external
/// case-law search and grounded citation verification calls.
pub mod retry;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

// --- Provider Configuration ---

pub use config::{DEFAULT_BASE_URL, DEFAULT_MODEL, ProviderConfig};

// --- Context Management ---

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Lifecycle Hooks ---

pub use hooks::{
    HOOK_POST_TOOL_USE, HOOK_PRE_TOOL_USE, HOOK_USER_PROMPT_SUBMIT, HookDecision, Hooks,
    PostToolUseEvent, PreToolUseEvent, UserPromptSubmitEvent,
};

// --- Tool System ---

pub use tools::{Tool, ToolBuilder, tool};

// --- Core Types ---

pub use types::{
    CallOptions, CallOptionsBuilder, ContentBlock, ImageBlock, ImageDetail, Message, MessageRole,
    TextBlock, ThinkingBlock, ToolResultBlock, ToolUseBlock, Usage,
};

// --- Data Model ---

pub use models::{
    Alert, AlertSeverity, AnalysisType, Case, CaseFilter, CaseNumber, CaseStatus, Connection,
    EvidenceItem, EvidenceType, Insight, LegalFact, LegalFilter, PriorityAction, Scope, Severity,
    TokenTally, Urgency,
};

// --- Corpus Store ---

pub use corpus::{CorpusStore, InMemoryCorpusStore};

// --- Sqlite Persistence ---

pub use db::SqliteCorpusStore;

// --- Context Builder ---

pub use context_builder::ContextBuilder;

// --- Tool Registry ---

pub use tool_registry::{CaseLawProvider, PrecedentHit, build_registry};

// --- Streaming Runner ---

pub use streaming_runner::{RunOutcome, StreamingRunner};

// --- Tool Loop ---

pub use tool_loop::{MAX_ROUNDS, ToolLoop, ToolLoopConfig, ToolLoopOutcome};

// --- Workflow Engine ---

pub use workflows::{CascadeAction, HealthCheckResult, WorkflowEngine};

// --- Citation Verifier ---

pub use citation_verifier::{
    CitationResult, CitationVerdict, CitationVerifier, GroundedVerifier, LocalCitationIndex,
    VerificationReport,
};

// --- Event Bus ---

pub use event_bus::{ClientId, Event, EventBus, WorkflowKind};

// --- Insight Log ---

pub use insight_log::InsightLog;

// --- Token Accountant ---

pub use token_accountant::TokenAccountant;

// --- Request Gate ---

pub use request_gate::{GateGuard, RequestGate};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module with the most commonly used types. Import with
/// `use case_nexus::prelude::*;` for typical server-binary usage.
pub mod prelude {
    pub use crate::{
        AnalysisType, CallOptions, CaseNumber, ContentBlock, CorpusStore, Error, Event, EventBus,
        HookDecision, Hooks, InsightLog, Message, RequestGate, Result, Scope, StreamingRunner,
        Tool, TokenAccountant, ToolLoop, WorkflowEngine, WorkflowKind, tool,
    };
}
