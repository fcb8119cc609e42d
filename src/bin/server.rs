//! Case Nexus server binary (§6): a single `axum` process hosting the
//! read HTTP surface, the per-client WebSocket control channel, and the
//! Workflow Engine wiring that ties the Analysis Orchestrator core to the
//! outside world.
//!
//! CLI: `case-nexus-server [--port N] [--db PATH]`. Exit code 0 on a clean
//! `Ctrl+C` shutdown, non-zero on startup failure (bind error, missing
//! `CASE_NEXUS_API_KEY`, unreadable database file).

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use case_nexus::{
    CallOptions, CaseLawProvider, CaseNumber, CorpusStore, EventBus, InsightLog, PrecedentHit,
    ProviderConfig, RequestGate, Scope, SqliteCorpusStore, StreamingRunner, TokenAccountant,
    WorkflowEngine,
};
use case_nexus::citation_verifier::{CitationResult, CitationVerdict, GroundedVerifier, LocalCitationIndex};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

struct ServerArgs {
    port: u16,
    db_path: String,
}

/// Manual flag parsing (`--port N`, `--db PATH`) rather than pulling in a
/// CLI-argument crate for two flags.
fn parse_args() -> ServerArgs {
    let mut port = 8787u16;
    let mut db_path = "case_nexus.db".to_string();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => {
                if let Some(v) = args.next() {
                    if let Ok(p) = v.parse() {
                        port = p;
                    }
                }
            }
            "--db" => {
                if let Some(v) = args.next() {
                    db_path = v;
                }
            }
            _ => {}
        }
    }
    ServerArgs { port, db_path }
}

/// Grounded case-law search and citation verification backed by a generic
/// JSON search endpoint (`CASE_NEXUS_WEB_SEARCH_KEY` gates availability,
/// §6 "Environment"). Degrades to a transport error when unset or
/// unreachable — the Citation Verifier and `search_case_law` tool both
/// already handle that gracefully (§4.7 step 4, §8 S5).
struct HttpCaseLawProvider {
    http: reqwest::Client,
    search_key: Option<String>,
}

impl HttpCaseLawProvider {
    fn new(search_key: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), search_key }
    }

    async fn raw_search(&self, query: &str) -> case_nexus::Result<Vec<PrecedentHit>> {
        let key = self
            .search_key
            .as_ref()
            .ok_or_else(|| case_nexus::Error::transport("no web search key configured"))?;

        let config = case_nexus::retry::RetryConfig::new().with_max_attempts(3);
        let query = query.to_string();
        let http = self.http.clone();
        let key = key.clone();
        case_nexus::retry::retry_with_backoff_conditional(config, move || {
            let http = http.clone();
            let key = key.clone();
            let query = query.clone();
            async move {
                let response = http
                    .get("https://api.case-law-search.example/v1/search")
                    .bearer_auth(&key)
                    .query(&[("q", query.as_str())])
                    .send()
                    .await
                    .map_err(case_nexus::Error::Http)?;
                let body: serde_json::Value =
                    response.json().await.map_err(case_nexus::Error::Http)?;
                let hits = body["results"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|r| {
                        Some(PrecedentHit {
                            case_name: r["case_name"].as_str()?.to_string(),
                            citation: r["citation"].as_str().unwrap_or_default().to_string(),
                            court: r["court"].as_str().map(str::to_string),
                            date: r["date"].as_str().map(str::to_string),
                            snippet: r["snippet"].as_str().unwrap_or_default().to_string(),
                            url: r["url"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect();
                Ok(hits)
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl CaseLawProvider for HttpCaseLawProvider {
    async fn search_case_law(&self, query: &str, court: Option<&str>) -> case_nexus::Result<Vec<PrecedentHit>> {
        let full_query = match court {
            Some(c) => format!("{query} court:{c}"),
            None => query.to_string(),
        };
        self.raw_search(&full_query).await
    }

    async fn search_precedents_for_charges(&self, charges: &[String]) -> case_nexus::Result<Vec<PrecedentHit>> {
        let query = charges.join(" OR ");
        self.raw_search(&query).await
    }
}

#[async_trait::async_trait]
impl GroundedVerifier for HttpCaseLawProvider {
    async fn verify(&self, citations: &[String]) -> case_nexus::Result<Vec<CitationResult>> {
        let key = self
            .search_key
            .as_ref()
            .ok_or_else(|| case_nexus::Error::transport("no web search key configured"))?;

        let response = self
            .http
            .post("https://api.case-law-search.example/v1/verify")
            .bearer_auth(key)
            .json(&json!({ "citations": citations }))
            .send()
            .await
            .map_err(case_nexus::Error::Http)?;
        let body: serde_json::Value = response.json().await.map_err(case_nexus::Error::Http)?;

        let results = citations
            .iter()
            .map(|citation| {
                let entry = body["results"]
                    .as_array()
                    .and_then(|rows| rows.iter().find(|r| r["citation"] == *citation));
                match entry {
                    Some(row) => CitationResult {
                        citation: citation.clone(),
                        normalized: citation.split_whitespace().collect::<Vec<_>>().join(" "),
                        case_name: row["case_name"].as_str().map(str::to_string),
                        url: row["url"].as_str().map(str::to_string),
                        verdict: match row["verdict"].as_str() {
                            Some("verified") => CitationVerdict::Verified,
                            Some("ambiguous") => CitationVerdict::Ambiguous,
                            _ => CitationVerdict::NotFound,
                        },
                    },
                    None => CitationResult {
                        citation: citation.clone(),
                        normalized: citation.split_whitespace().collect::<Vec<_>>().join(" "),
                        case_name: None,
                        url: None,
                        verdict: CitationVerdict::NotFound,
                    },
                }
            })
            .collect();
        Ok(results)
    }
}

struct AppState {
    corpus: Arc<dyn CorpusStore>,
    insights: Arc<InsightLog>,
    event_bus: Arc<EventBus>,
    engine: Arc<WorkflowEngine>,
    cancels: std::sync::Mutex<std::collections::HashMap<String, Arc<AtomicBool>>>,
}

impl AppState {
    fn cancel_flag(&self, client: &str) -> Arc<AtomicBool> {
        let mut cancels = self.cancels.lock().expect("cancel map lock poisoned");
        cancels
            .entry(client.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    fn disconnect(&self, client: &str) {
        if let Some(flag) = self.cancels.lock().expect("cancel map lock poisoned").remove(client) {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }
        self.event_bus.unregister(client);
    }
}

// ============================================================================
// READ HTTP SURFACE (§6)
// ============================================================================

#[derive(Deserialize)]
struct CasesQuery {
    officer: Option<String>,
    charge: Option<String>,
}

async fn get_cases(State(state): State<Arc<AppState>>, Query(q): Query<CasesQuery>) -> impl IntoResponse {
    let filter = case_nexus::CaseFilter {
        officer: q.officer,
        charge: q.charge,
        status: None,
        date_range: None,
    };
    match state.corpus.search_cases(&filter).await {
        Ok(numbers) => {
            let mut cases = Vec::with_capacity(numbers.len());
            for n in numbers {
                if let Ok(case) = state.corpus.get_case(&n).await {
                    cases.push(case);
                }
            }
            Json(json!({ "cases": cases })).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn get_case(State(state): State<Arc<AppState>>, Path(cn): Path<String>) -> impl IntoResponse {
    let case_number = match CaseNumber::new(cn) {
        Ok(cn) => cn,
        Err(e) => return error_response(e),
    };
    match state.corpus.get_case(&case_number).await {
        Ok(case) => Json(case).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_evidence(State(state): State<Arc<AppState>>, Path(cn): Path<String>) -> impl IntoResponse {
    let case_number = match CaseNumber::new(cn) {
        Ok(cn) => cn,
        Err(e) => return error_response(e),
    };
    match state.corpus.get_evidence(&case_number).await {
        Ok(items) => Json(json!({ "evidence": items })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_alerts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.corpus.list_alerts().await {
        Ok(alerts) => Json(json!({ "alerts": alerts })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_connections(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.corpus.list_connections().await {
        Ok(connections) => Json(json!({ "connections": connections })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let case_count = state.corpus.all_case_numbers().await.map(|v| v.len()).unwrap_or(0);
    let insight_count = state.insights.count().await;
    let tally = state.engine.token_accountant.snapshot();
    Json(json!({
        "case_count": case_count,
        "insight_count": insight_count,
        "tokens": tally,
    }))
}

#[derive(Deserialize)]
struct AnalysisLogQuery {
    scope: Option<String>,
}

async fn get_analysis_log(State(state): State<Arc<AppState>>, Query(q): Query<AnalysisLogQuery>) -> impl IntoResponse {
    let scope = q.scope.and_then(|s| {
        if s == "full_caseload" {
            Some(Scope::FullCaseload)
        } else {
            CaseNumber::new(s).ok().map(|cn| Scope::case(&cn))
        }
    });
    match state.insights.list(scope, None, None).await {
        Ok(insights) => Json(json!({ "insights": insights })).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: case_nexus::Error) -> axum::response::Response {
    (axum::http::StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response()
}

// ============================================================================
// WEBSOCKET CONTROL CHANNEL (§6)
// ============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Deserialize)]
struct Inbound {
    command: String,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let mut rx = state.event_bus.register(client_id.clone());
    let (mut sink, mut stream) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&event) {
                if out_tx.send(text).is_err() {
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let inbound: Inbound = match serde_json::from_str(&text) {
            Ok(i) => i,
            Err(e) => {
                state.event_bus.emit(
                    &client_id,
                    case_nexus::Event::AnalysisError { message: format!("malformed command: {e}") },
                );
                continue;
            }
        };
        dispatch_command(&state, &client_id, inbound).await;
    }

    state.disconnect(&client_id);
    forwarder.abort();
    writer.abort();
}

async fn dispatch_command(state: &Arc<AppState>, client_id: &str, inbound: Inbound) {
    let cancel = state.cancel_flag(client_id);
    cancel.store(false, std::sync::atomic::Ordering::SeqCst);

    let engine = state.engine.clone();
    let client = client_id.to_string();
    let payload = inbound.payload;

    macro_rules! field {
        ($name:expr) => {
            payload[$name].as_str().unwrap_or_default().to_string()
        };
    }

    match inbound.command.as_str() {
        "run_health_check" => {
            tokio::spawn(async move {
                let _ = engine.run_health_check(&client, &cancel).await;
            });
        }
        "run_deep_analysis" => {
            let cn = field!("case_number");
            tokio::spawn(async move {
                if let Ok(cn) = CaseNumber::new(cn) {
                    let _ = engine.run_deep_analysis(&client, &cn, &cancel).await;
                }
            });
        }
        "run_adversarial" => {
            let cn = field!("case_number");
            tokio::spawn(async move {
                if let Ok(cn) = CaseNumber::new(cn) {
                    let _ = engine.run_adversarial(&client, &cn, &cancel).await;
                }
            });
        }
        "generate_motion" => {
            let cn = field!("case_number");
            let motion_type = field!("motion_type");
            tokio::spawn(async move {
                if let Ok(cn) = CaseNumber::new(cn) {
                    let _ = engine.run_motion_generation(&client, &cn, &motion_type, &cancel).await;
                }
            });
        }
        "analyze_evidence" => {
            let cn = field!("case_number");
            let evidence_id = field!("evidence_id");
            tokio::spawn(async move {
                if let Ok(cn) = CaseNumber::new(cn) {
                    let _ = engine.run_evidence_analysis(&client, &cn, &evidence_id, &cancel).await;
                }
            });
        }
        "chat_message" => {
            let message = field!("message");
            tokio::spawn(async move {
                let _ = engine.run_chat_message(&client, &message, &cancel).await;
            });
        }
        "clear_chat" => {
            engine.clear_chat(client_id);
        }
        "run_hearing_prep" => {
            let cn = field!("case_number");
            tokio::spawn(async move {
                if let Ok(cn) = CaseNumber::new(cn) {
                    let _ = engine.run_hearing_prep(&client, &cn, &cancel).await;
                }
            });
        }
        "run_client_letter" => {
            let cn = field!("case_number");
            tokio::spawn(async move {
                if let Ok(cn) = CaseNumber::new(cn) {
                    let _ = engine.run_client_letter(&client, &cn, &cancel).await;
                }
            });
        }
        "run_cascade" => {
            tokio::spawn(async move {
                let _ = engine.run_cascade(&client, &cancel).await;
            });
        }
        "create_widget" => {
            let request = field!("request");
            tokio::spawn(async move {
                let _ = engine.run_create_widget(&client, &request, &cancel).await;
            });
        }
        "search_case_law" => {
            let query = field!("query");
            let court = payload["court"].as_str().map(str::to_string);
            let tools = engine.tools.clone();
            let event_bus = state.event_bus.clone();
            tokio::spawn(async move {
                if let Some(tool) = tools.iter().find(|t| t.name() == "search_case_law") {
                    let args = json!({ "query": query, "court": court });
                    match tool.execute(args).await {
                        Ok(result) => event_bus.emit(
                            &client,
                            case_nexus::Event::Results { namespace: "search_case_law", payload: result },
                        ),
                        Err(e) => event_bus.emit(
                            &client,
                            case_nexus::Event::AnalysisError { message: e.to_string() },
                        ),
                    }
                }
            });
        }
        "load_demo_caseload" => {
            // Synthetic demo data generation is external to the core
            // (spec §1 "Explicitly out of scope"); the core only needs the
            // read/write contract, so this command is a status no-op unless
            // a concrete corpus loader is wired in ahead of time.
            state.event_bus.emit(
                client_id,
                case_nexus::Event::Status { message: "caseload loading is handled externally to the core".to_string() },
            );
        }
        other => {
            state.event_bus.emit(
                client_id,
                case_nexus::Event::AnalysisError { message: format!("unknown command: {other}") },
            );
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();

    let config = match ProviderConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    let store = match SqliteCorpusStore::open(&args.db_path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to open database at {}: {e}", args.db_path);
            std::process::exit(1);
        }
    };
    let corpus: Arc<dyn CorpusStore> = Arc::new(store);

    let insights = Arc::new(InsightLog::new());
    let event_bus = Arc::new(EventBus::new());
    let token_accountant = Arc::new(TokenAccountant::new());
    let runner = Arc::new(StreamingRunner::new(event_bus.clone(), token_accountant.clone()));

    let legal_facts = corpus
        .search_legal(&case_nexus::LegalFilter::default())
        .await
        .unwrap_or_default();
    let citation_index = Arc::new(LocalCitationIndex::build(legal_facts));

    let case_law_provider: Arc<dyn CaseLawProvider> = Arc::new(HttpCaseLawProvider::new(config.web_search_key.clone()));
    let grounded_verifier: Arc<dyn GroundedVerifier> = Arc::new(HttpCaseLawProvider::new(config.web_search_key.clone()));

    let tools = case_nexus::build_registry(
        corpus.clone(),
        insights.clone(),
        citation_index.clone(),
        grounded_verifier.clone(),
        case_law_provider,
        event_bus.clone(),
    );

    let base_options = match CallOptions::builder()
        .system_prompt("")
        .model(config.model.clone())
        .base_url(config.base_url.clone())
        .api_key(config.api_key.clone())
        .build()
    {
        Ok(o) => o,
        Err(e) => {
            log::error!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    let engine = Arc::new(WorkflowEngine {
        corpus: corpus.clone(),
        insights: insights.clone(),
        event_bus: event_bus.clone(),
        gate: RequestGate::new(),
        runner,
        token_accountant,
        tools,
        citation_index,
        grounded_verifier,
        chat_sessions: std::sync::Mutex::new(std::collections::HashMap::new()),
        base_options,
    });

    let state = Arc::new(AppState {
        corpus,
        insights,
        event_bus,
        engine,
        cancels: std::sync::Mutex::new(std::collections::HashMap::new()),
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/cases", get(get_cases))
        .route("/api/case/:case_number", get(get_case))
        .route("/api/evidence/:case_number", get(get_evidence))
        .route("/api/alerts", get(get_alerts))
        .route("/api/connections", get(get_connections))
        .route("/api/stats", get(get_stats))
        .route("/api/analysis-log", get(get_analysis_log))
        .route("/healthz", post(|| async { "ok" }))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    log::info!("case-nexus-server listening on {addr}");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutting down");
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        log::error!("server error: {e}");
        std::process::exit(1);
    }

    std::process::exit(0);
}
