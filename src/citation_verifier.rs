//! Citation Verifier (C7, §4.7): extracts citations from generated legal text
//! and verifies them against a local index, falling back to a grounded
//! `verify_citations` call for anything unmatched.
//!
//! Regexes are compiled once via `std::sync::OnceLock` (§9.4.7) rather than
//! per-call, paying construction cost once and reusing immutable state
//! across calls.

use crate::event_bus::{Event, EventBus};
use crate::models::LegalFact;
use crate::Result;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::OnceLock;

fn state_code_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"§\s?\d+-\d+-\d+").expect("valid state code regex"))
}

fn federal_reporter_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\d+\s+U\.S\.\s+\d+").expect("valid federal reporter regex"))
}

fn common_reporter_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"\d+\s+[A-Z][A-Za-z\.]+\s+\d+").expect("valid common reporter regex")
    })
}

/// Extracts candidate citations via the three deterministic patterns (§4.7
/// step 1). Order of patterns is state code, federal reporter, common
/// reporter; duplicates are deduplicated while preserving first-seen order.
pub fn extract_citations(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for re in [state_code_regex(), federal_reporter_regex(), common_reporter_regex()] {
        for m in re.find_iter(text) {
            let citation = m.as_str().trim().to_string();
            if seen.insert(citation.clone()) {
                out.push(citation);
            }
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationVerdict {
    Verified,
    NotFound,
    Ambiguous,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitationResult {
    pub citation: String,
    pub normalized: String,
    pub case_name: Option<String>,
    pub url: Option<String>,
    pub verdict: CitationVerdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub verified: Vec<CitationResult>,
    pub not_found: Vec<CitationResult>,
    pub ambiguous: Vec<CitationResult>,
}

fn normalize(citation: &str) -> String {
    citation.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A local exact-match index built from the Corpus Store's legal facts at
/// startup (§4.7 step 2), consulted before any grounded call.
pub struct LocalCitationIndex {
    facts: HashMap<String, LegalFact>,
}

impl LocalCitationIndex {
    pub fn build(facts: Vec<LegalFact>) -> Self {
        let index = facts
            .into_iter()
            .map(|f| (normalize(&f.citation_token), f))
            .collect();
        Self { facts: index }
    }

    pub fn lookup(&self, citation: &str) -> Option<&LegalFact> {
        self.facts.get(&normalize(citation))
    }
}

/// A grounded `verify_citations` call, batched over unmatched citations. The
/// Tool Registry's own `search_case_law`/`verify_citations` tools back onto
/// the same external provider this trait abstracts over.
#[async_trait::async_trait]
pub trait GroundedVerifier: Send + Sync {
    async fn verify(&self, citations: &[String]) -> Result<Vec<CitationResult>>;
}

pub struct CitationVerifier<'a> {
    index: &'a LocalCitationIndex,
    grounded: &'a dyn GroundedVerifier,
    event_bus: &'a EventBus,
}

impl<'a> CitationVerifier<'a> {
    pub fn new(index: &'a LocalCitationIndex, grounded: &'a dyn GroundedVerifier, event_bus: &'a EventBus) -> Self {
        Self { index, grounded, event_bus }
    }

    /// Runs the full verification pipeline (§4.7). On grounded-provider
    /// failure, emits `citation_verification_results {error, local_citations}`
    /// directly (§4.7 step 4, §8 S5) so the UI can still display the
    /// extracted set as unverified; the returned report carries only what
    /// was resolved locally.
    pub async fn verify_document(&self, client: &str, text: &str) -> VerificationReport {
        self.event_bus.emit(client, Event::CitationVerificationStarted);

        let candidates = extract_citations(text);
        let mut verified = Vec::new();
        let mut unmatched = Vec::new();

        for citation in &candidates {
            if let Some(fact) = self.index.lookup(citation) {
                verified.push(CitationResult {
                    citation: citation.clone(),
                    normalized: normalize(citation),
                    case_name: Some(fact.title.clone()),
                    url: None,
                    verdict: CitationVerdict::Verified,
                });
            } else {
                unmatched.push(citation.clone());
            }
        }

        let mut not_found = Vec::new();
        let mut ambiguous = Vec::new();

        if !unmatched.is_empty() {
            match self.grounded.verify(&unmatched).await {
                Ok(results) => {
                    for result in results {
                        match result.verdict {
                            CitationVerdict::Verified => verified.push(result),
                            CitationVerdict::NotFound => not_found.push(result),
                            CitationVerdict::Ambiguous => ambiguous.push(result),
                        }
                    }
                }
                Err(e) => {
                    self.event_bus.emit(
                        client,
                        Event::CitationVerificationResults {
                            payload: json!({
                                "error": e.to_string(),
                                "local_citations": candidates,
                            }),
                        },
                    );
                    return VerificationReport { verified, not_found, ambiguous };
                }
            }
        }

        let report = VerificationReport { verified, not_found, ambiguous };
        self.event_bus.emit(
            client,
            Event::CitationVerificationResults { payload: serde_json::to_value(&report).unwrap_or_default() },
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_state_code_federal_and_common_reporter_citations() {
        let text = "See § 18-1-304 and 410 U.S. 113, also cited in 347 F.2d 12.";
        let citations = extract_citations(text);
        assert!(citations.iter().any(|c| c.contains("18-1-304")));
        assert!(citations.iter().any(|c| c.contains("410") && c.contains("U.S.")));
        assert!(citations.iter().any(|c| c.contains("347") && c.contains("F.2d")));
    }

    #[test]
    fn extraction_deduplicates_repeated_citations() {
        let text = "410 U.S. 113 ... later cites 410 U.S. 113 again.";
        let citations = extract_citations(text);
        assert_eq!(citations.iter().filter(|c| c.contains("410")).count(), 1);
    }

    #[test]
    fn local_index_lookup_is_normalized() {
        let index = LocalCitationIndex::build(vec![LegalFact {
            citation_token: "18-1-304".to_string(),
            jurisdiction: "state".to_string(),
            title: "Assault statute".to_string(),
            holding: "...".to_string(),
            summary: None,
        }]);
        assert!(index.lookup("18-1-304").is_some());
        assert!(index.lookup("99-9-999").is_none());
    }

    struct FailingVerifier;
    #[async_trait::async_trait]
    impl GroundedVerifier for FailingVerifier {
        async fn verify(&self, _citations: &[String]) -> Result<Vec<CitationResult>> {
            Err(crate::Error::transport("search provider down"))
        }
    }

    #[tokio::test]
    async fn grounded_failure_emits_error_and_local_citations_without_erroring_the_caller() {
        let index = LocalCitationIndex::build(vec![]);
        let verifier = FailingVerifier;
        let bus = EventBus::new();
        let mut rx = bus.register("c1".to_string());

        let cv = CitationVerifier::new(&index, &verifier, &bus);
        let report = cv.verify_document("c1", "See 410 U.S. 113.").await;

        assert!(report.verified.is_empty());
        assert!(report.not_found.is_empty());

        let started = rx.recv().await.unwrap();
        assert!(matches!(started, Event::CitationVerificationStarted));

        let results = rx.recv().await.unwrap();
        let payload = match results {
            Event::CitationVerificationResults { payload } => payload,
            other => panic!("expected CitationVerificationResults, got {other:?}"),
        };
        assert_eq!(payload["error"], serde_json::json!("search provider down"));
        let local_citations = payload["local_citations"].as_array().unwrap();
        assert_eq!(local_citations.len(), 1);
        assert!(local_citations[0].as_str().unwrap().contains("410"));
    }
}
