//! S5 — citation verification degrade (spec §8): a motion cites a statute
//! with no local match; when the grounded lookup provider errors, the
//! verifier must emit `citation_verification_results {error, local_citations}`
//! with `local_citations` equal to the regex-extracted set, rather than
//! surfacing a hard error or silently folding the citation into `not_found`.

mod common;

use case_nexus::citation_verifier::{CitationResult, GroundedVerifier, LocalCitationIndex};
use case_nexus::{
    Case, CaseNumber, CaseStatus, CorpusStore, Event, EventBus, InMemoryCorpusStore, InsightLog,
    RequestGate, Severity, StreamingRunner, TokenAccountant, WorkflowEngine,
};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

fn sample_case(cn: &str) -> Case {
    Case {
        case_number: CaseNumber::new(cn).unwrap(),
        defendant: "Doe, J.".to_string(),
        severity: Severity::Felony,
        status: CaseStatus::Open,
        charges: vec!["Possession".to_string()],
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

struct FailingVerifier;
#[async_trait::async_trait]
impl GroundedVerifier for FailingVerifier {
    async fn verify(&self, _citations: &[String]) -> case_nexus::Result<Vec<CitationResult>> {
        Err(case_nexus::Error::other("case law lookup unavailable"))
    }
}

#[tokio::test]
async fn motion_with_unverifiable_citation_degrades_to_error_with_local_citations() {
    let store = InMemoryCorpusStore::new();
    store.seed_case(sample_case("CR-44"));
    let corpus: Arc<dyn CorpusStore> = Arc::new(store);

    let motion_text =
        "The defense moves to suppress under §99-9-999, an unindexed statute with no local match.";
    let stub = common::spawn_stub_provider(Arc::new(move |_req| common::sse_text_turn(motion_text, "end_turn")))
        .await;

    let insights = Arc::new(InsightLog::new());
    let event_bus = Arc::new(EventBus::new());
    let token_accountant = Arc::new(TokenAccountant::new());
    let runner = Arc::new(StreamingRunner::new(event_bus.clone(), token_accountant.clone()));
    let citation_index = Arc::new(LocalCitationIndex::build(vec![]));
    let grounded_verifier: Arc<dyn GroundedVerifier> = Arc::new(FailingVerifier);
    let base_options = case_nexus::CallOptions::builder()
        .model("test-model")
        .base_url(&stub.base_url)
        .api_key("test-key")
        .build()
        .unwrap();

    let engine = WorkflowEngine {
        corpus,
        insights,
        event_bus: event_bus.clone(),
        gate: RequestGate::new(),
        runner,
        token_accountant,
        tools: vec![],
        citation_index,
        grounded_verifier,
        chat_sessions: Mutex::new(std::collections::HashMap::new()),
        base_options,
    };

    let mut rx = event_bus.register("client-1".to_string());
    let cancel = AtomicBool::new(false);
    let case_number = CaseNumber::new("CR-44").unwrap();

    engine
        .run_motion_generation("client-1", &case_number, "motion to suppress", &cancel)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(events.iter().any(|e| matches!(e, Event::CitationVerificationStarted)));

    let payload = events
        .iter()
        .find_map(|e| match e {
            Event::CitationVerificationResults { payload } => Some(payload.clone()),
            _ => None,
        })
        .expect("citation_verification_results event emitted");

    assert!(payload["error"].as_str().unwrap().contains("unavailable"));
    let local_citations = payload["local_citations"].as_array().unwrap();
    assert_eq!(local_citations.len(), 1);
    assert!(local_citations[0].as_str().unwrap().contains("99-9-999"));
    assert!(payload.get("not_found").is_none());
    assert!(payload.get("verified").is_none());

    assert!(!events.iter().any(|e| matches!(e, Event::AnalysisError { .. })));

    let motion_insights = engine
        .insights
        .list(Some(case_nexus::Scope::case(&case_number)), Some(case_nexus::AnalysisType::Motion), None)
        .await
        .unwrap();
    assert_eq!(motion_insights.len(), 1);
}
