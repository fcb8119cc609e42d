//! S1 — health check happy path (spec §8): a caseload where two cases share
//! an officer produces a Connection naming both, and exactly one Insight is
//! recorded for it.

mod common;

use case_nexus::citation_verifier::{CitationResult, GroundedVerifier, LocalCitationIndex};
use case_nexus::{
    AnalysisType, Case, CaseNumber, CaseStatus, CorpusStore, Event, EventBus, InMemoryCorpusStore,
    InsightLog, RequestGate, Scope, Severity, StreamingRunner, TokenAccountant, WorkflowEngine,
};
use std::sync::{Arc, Mutex};

fn sample_case(cn: &str, officer: &str) -> Case {
    Case {
        case_number: CaseNumber::new(cn).unwrap(),
        defendant: "Doe, J.".to_string(),
        severity: Severity::Misdemeanor,
        status: CaseStatus::Open,
        charges: vec!["DUI".to_string()],
        filing_date: None,
        arrest_date: None,
        hearing_date: None,
        officer: Some(officer.to_string()),
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

fn build_engine(corpus: Arc<dyn CorpusStore>, base_url: &str) -> WorkflowEngine {
    let insights = Arc::new(InsightLog::new());
    let event_bus = Arc::new(EventBus::new());
    let token_accountant = Arc::new(TokenAccountant::new());
    let runner = Arc::new(StreamingRunner::new(event_bus.clone(), token_accountant.clone()));
    let citation_index = Arc::new(LocalCitationIndex::build(vec![]));
    let grounded_verifier: Arc<dyn GroundedVerifier> = Arc::new(NoopVerifier);

    let base_options = case_nexus::CallOptions::builder()
        .model("test-model")
        .base_url(base_url)
        .api_key("test-key")
        .build()
        .unwrap();

    WorkflowEngine {
        corpus,
        insights,
        event_bus,
        gate: RequestGate::new(),
        runner,
        token_accountant,
        tools: vec![],
        citation_index,
        grounded_verifier,
        chat_sessions: Mutex::new(std::collections::HashMap::new()),
        base_options,
    }
}

#[tokio::test]
async fn health_check_finds_shared_officer_connection_and_writes_one_insight() {
    let store = InMemoryCorpusStore::new();
    store.seed_case(sample_case("A1", "Rodriguez"));
    store.seed_case(sample_case("A2", "Rodriguez"));
    store.seed_case(sample_case("B1", "Okafor"));
    let corpus: Arc<dyn CorpusStore> = Arc::new(store);

    let response_json = serde_json::json!({
        "alerts": [],
        "connections": [{
            "id": "conn-1",
            "connection_type": "shared_officer",
            "confidence": 0.9,
            "case_numbers": ["A1", "A2"],
            "title": "Shared arresting officer",
            "description": "Officer Rodriguez appears on both cases.",
            "suggestion": null
        }],
        "priority_actions": []
    })
    .to_string();

    let stub = common::spawn_stub_provider(Arc::new(move |_req| {
        common::sse_text_turn(&response_json, "end_turn")
    }))
    .await;

    let engine = build_engine(corpus, &stub.base_url);
    let mut rx = engine.event_bus.register("client-1".to_string());
    let cancel = std::sync::atomic::AtomicBool::new(false);

    engine.run_health_check("client-1", &cancel).await.unwrap();

    let mut results_payload = None;
    while let Ok(event) = rx.try_recv() {
        if let Event::Results { namespace: "health_check", payload } = event {
            results_payload = Some(payload);
        }
    }
    let payload = results_payload.expect("health_check_results event emitted");
    let connections = payload["connections"].as_array().unwrap();
    assert_eq!(connections.len(), 1);
    let case_numbers: Vec<&str> = connections[0]["case_numbers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(case_numbers, vec!["A1", "A2"]);
    assert_eq!(connections[0]["connection_type"], "shared_officer");

    let insights = engine
        .insights
        .list(Some(Scope::FullCaseload), Some(AnalysisType::HealthCheck), None)
        .await
        .unwrap();
    assert_eq!(insights.len(), 1);

    // Connections/alerts are now readable back off the Corpus Store.
    let stored_connections = engine.corpus.list_connections().await.unwrap();
    assert_eq!(stored_connections.len(), 1);
}
