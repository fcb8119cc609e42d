//! Error types for Case Nexus.
//!
//! One variant per row of the error taxonomy in the system design: transport
//! failures from the model provider, tool/schema failures inside the agentic
//! loop, gate contention, missing entities, and parse degradation of
//! structured workflow output.

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Case Nexus.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request to the model provider or an external search provider failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite persistence error.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Invalid configuration (missing API key, malformed base URL, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The model provider returned a non-success status or a malformed stream.
    /// Surfaced to clients as `<ns>_error`; the Request Gate is released and
    /// the Token Accountant is left untouched.
    #[error("transport error: {0}")]
    Transport(String),

    /// A tool handler raised an error. Never aborts the Tool Loop: it is
    /// folded into a `{error, message}` tool result and fed back to the model.
    #[error("tool error: {0}")]
    Tool(String),

    /// The model requested a tool with an input that violates its schema.
    #[error("bad tool input: {0}")]
    SchemaError(String),

    /// The Request Gate is already held for this client.
    #[error("busy")]
    Busy,

    /// A case number or evidence id referenced by a client command does not
    /// resolve in the Corpus Store.
    #[error("not found: {0}")]
    NotFound(String),

    /// A workflow's structured output failed to parse; the raw text is still
    /// delivered and an Insight is still written with empty structured fields.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input supplied by a caller (not the model).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Request timed out.
    #[error("request timeout")]
    Timeout,

    /// Client disconnected / operation was interrupted mid-flight.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for conditions that don't warrant a dedicated variant.
    #[error("error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Error::SchemaError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Whether this error represents a transient condition worth retrying
    /// (used by `retry::retry_with_backoff_conditional` for the external
    /// search / citation-verification providers).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout | Error::Transport(_) => true,
            Error::Other(msg) => {
                msg.contains("500") || msg.contains("502") || msg.contains("503") || msg.contains("504")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(Error::Busy.to_string(), "busy");
        assert_eq!(Error::not_found("CR-12").to_string(), "not found: CR-12");
        assert_eq!(Error::timeout().to_string(), "request timeout");
    }

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(Error::timeout().is_retryable());
        assert!(Error::transport("stream closed").is_retryable());
        assert!(!Error::Busy.is_retryable());
        assert!(!Error::invalid_input("bad").is_retryable());
        assert!(!Error::config("missing key").is_retryable());
    }

    #[test]
    fn result_alias_compiles() {
        fn ok() -> Result<i32> {
            Ok(1)
        }
        fn err() -> Result<i32> {
            Err(Error::Busy)
        }
        assert_eq!(ok().unwrap(), 1);
        assert!(err().is_err());
    }
}
