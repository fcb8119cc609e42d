//! Thin wall-clock boundary so callers that need a deterministic timestamp
//! (tests, replayed insights) can supply their own instead of reading the
//! system clock directly.

/// Current time as an RFC 3339 string, used to stamp [`crate::models::Insight`]
/// and chat history rows.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
