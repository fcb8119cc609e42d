//! Insight Log (C9, §4.9): append-only store of completed analyses, queryable
//! by scope and type. No deletion. Superseded health-check Insights remain
//! discoverable (§9 Open Question 1 — resolved: retain, matching the source).

use crate::models::{AnalysisType, Insight, Scope};
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory, monotonically-sequenced Insight Log.
///
/// The server binary backs this with [`crate::db::Db`] instead; both share
/// the same `list(scope?, type?, limit?)` query surface consulted by the UI,
/// `ContextBuilder::build_memory_context`, and the `get_prior_analyses` tool.
pub struct InsightLog {
    entries: Mutex<Vec<Insight>>,
    next_id: AtomicU64,
}

impl Default for InsightLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InsightLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Appends one completed analysis. `timestamp` is supplied by the caller
    /// (the Workflow Engine) rather than read from the system clock here, so
    /// the log stays deterministic under test.
    pub async fn append(
        &self,
        analysis_type: AnalysisType,
        scope: Scope,
        result: serde_json::Value,
    ) -> Result<Insight> {
        self.append_at(analysis_type, scope, result, crate::time::now_rfc3339())
            .await
    }

    pub async fn append_at(
        &self,
        analysis_type: AnalysisType,
        scope: Scope,
        result: serde_json::Value,
        timestamp: String,
    ) -> Result<Insight> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let insight = Insight {
            id,
            analysis_type,
            scope,
            result,
            timestamp,
        };
        let mut entries = self.entries.lock().expect("insight log lock poisoned");
        entries.push(insight.clone());
        Ok(insight)
    }

    /// `list(scope?, type?, limit?)` (§4.9). Newest first.
    pub async fn list(
        &self,
        scope: Option<Scope>,
        analysis_type: Option<AnalysisType>,
        limit: Option<usize>,
    ) -> Result<Vec<Insight>> {
        let entries = self.entries.lock().expect("insight log lock poisoned");
        let mut matches: Vec<Insight> = entries
            .iter()
            .rev()
            .filter(|i| scope.as_ref().map(|s| &i.scope == s).unwrap_or(true))
            .filter(|i| analysis_type.map(|t| i.analysis_type == t).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    pub async fn count(&self) -> usize {
        self.entries.lock().expect("insight log lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CaseNumber;

    #[tokio::test]
    async fn append_assigns_monotonic_ids() {
        let log = InsightLog::new();
        let a = log
            .append(AnalysisType::HealthCheck, Scope::FullCaseload, serde_json::json!({}))
            .await
            .unwrap();
        let b = log
            .append(AnalysisType::HealthCheck, Scope::FullCaseload, serde_json::json!({}))
            .await
            .unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn list_filters_by_scope_and_type_newest_first() {
        let log = InsightLog::new();
        let cn = CaseNumber::new("A1").unwrap();
        log.append(AnalysisType::HealthCheck, Scope::FullCaseload, serde_json::json!({"n": 1}))
            .await
            .unwrap();
        log.append(AnalysisType::DeepAnalysis, Scope::case(&cn), serde_json::json!({"n": 2}))
            .await
            .unwrap();
        log.append(AnalysisType::DeepAnalysis, Scope::case(&cn), serde_json::json!({"n": 3}))
            .await
            .unwrap();

        let results = log
            .list(Some(Scope::case(&cn)), Some(AnalysisType::DeepAnalysis), None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result["n"], 3);
    }

    #[tokio::test]
    async fn superseded_insights_remain_discoverable() {
        let log = InsightLog::new();
        log.append(AnalysisType::HealthCheck, Scope::FullCaseload, serde_json::json!({"run": 1}))
            .await
            .unwrap();
        log.append(AnalysisType::HealthCheck, Scope::FullCaseload, serde_json::json!({"run": 2}))
            .await
            .unwrap();

        let results = log.list(None, Some(AnalysisType::HealthCheck), None).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn limit_truncates_to_most_recent() {
        let log = InsightLog::new();
        for n in 0..10 {
            log.append(AnalysisType::HealthCheck, Scope::FullCaseload, serde_json::json!({"n": n}))
                .await
                .unwrap();
        }
        let results = log.list(None, None, Some(3)).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].result["n"], 9);
    }
}
