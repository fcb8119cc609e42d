//! S6 — parse degradation (spec §8): when the model's deep-analysis response
//! isn't a JSON object, the workflow must still record one Insight carrying
//! the raw text under `response_text` rather than dropping the analysis.

mod common;

use case_nexus::citation_verifier::{CitationResult, GroundedVerifier, LocalCitationIndex};
use case_nexus::{
    AnalysisType, Case, CaseNumber, CaseStatus, CorpusStore, Event, EventBus, InMemoryCorpusStore,
    InsightLog, RequestGate, Scope, Severity, StreamingRunner, TokenAccountant, WorkflowEngine,
};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

fn sample_case(cn: &str) -> Case {
    Case {
        case_number: CaseNumber::new(cn).unwrap(),
        defendant: "Doe, J.".to_string(),
        severity: Severity::Misdemeanor,
        status: CaseStatus::Open,
        charges: vec!["Trespass".to_string()],
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

struct NoopVerifier;
#[async_trait::async_trait]
impl GroundedVerifier for NoopVerifier {
    async fn verify(&self, _citations: &[String]) -> case_nexus::Result<Vec<CitationResult>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn non_json_deep_analysis_response_degrades_to_response_text_insight() {
    let store = InMemoryCorpusStore::new();
    store.seed_case(sample_case("CR-7"));
    let corpus: Arc<dyn CorpusStore> = Arc::new(store);

    let raw_text = "hello, I could not produce structured output this time";
    let stub = common::spawn_stub_provider(Arc::new(move |_req| common::sse_text_turn(raw_text, "end_turn")))
        .await;

    let insights = Arc::new(InsightLog::new());
    let event_bus = Arc::new(EventBus::new());
    let token_accountant = Arc::new(TokenAccountant::new());
    let runner = Arc::new(StreamingRunner::new(event_bus.clone(), token_accountant.clone()));
    let citation_index = Arc::new(LocalCitationIndex::build(vec![]));
    let grounded_verifier: Arc<dyn GroundedVerifier> = Arc::new(NoopVerifier);
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
    let case_number = CaseNumber::new("CR-7").unwrap();

    engine.run_deep_analysis("client-1", &case_number, &cancel).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let payload = events
        .iter()
        .find_map(|e| match e {
            Event::Results { namespace: "deep_analysis", payload } => Some(payload.clone()),
            _ => None,
        })
        .expect("deep_analysis_results event emitted");
    assert_eq!(payload["response_text"], raw_text);

    let recorded = engine
        .insights
        .list(Some(Scope::case(&case_number)), Some(AnalysisType::DeepAnalysis), None)
        .await
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].result["response_text"], raw_text);

    assert!(!events.iter().any(|e| matches!(e, Event::AnalysisError { .. })));
}
