//! Shared scaffolding for integration tests: a stub streaming provider that
//! speaks the same Messages-style SSE wire format the Streaming Runner
//! expects, so workflows can be driven end to end without a real long-context
//! model or network access.
//!
//! Each test spins up its own instance bound to an ephemeral port and scripts
//! canned SSE bodies keyed off how many prior messages are in the request —
//! round 1 of a tool loop always submits exactly one message, round 2 three
//! (user, assistant tool-use, folded tool-result), and so on, since the Tool
//! Loop never drops history.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use std::sync::Arc;

pub type ScriptFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

pub struct StubProvider {
    pub base_url: String,
    _handle: tokio::task::JoinHandle<()>,
}

async fn handle_messages(State(script): State<ScriptFn>, body: Body) -> Response {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let request: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    let sse = script(&request);
    ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
}

/// Spawns a one-off provider that renders a response for every POST
/// `/messages` by calling `script` with the decoded request body.
pub async fn spawn_stub_provider(script: ScriptFn) -> StubProvider {
    let app = Router::new()
        .route("/messages", post(handle_messages))
        .with_state(script);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    StubProvider {
        base_url: format!("http://{addr}"),
        _handle: handle,
    }
}

/// Number of `messages` entries in a provider request body (round counter).
pub fn request_message_count(request: &Value) -> usize {
    request["messages"].as_array().map(Vec::len).unwrap_or(0)
}

/// One SSE frame: `data: <json>\n\n`.
fn frame(json: Value) -> String {
    format!("data: {json}\n\n")
}

/// A complete streamed turn with no thinking: plain text only.
pub fn sse_text_turn(text: &str, stop_reason: &str) -> String {
    let mut out = String::new();
    out.push_str(&frame(serde_json::json!({"type": "message_start", "message": {"usage": {}}})));
    out.push_str(&frame(serde_json::json!({
        "type": "content_block_start", "index": 0,
        "content_block": {"type": "text", "text": ""}
    })));
    out.push_str(&frame(serde_json::json!({
        "type": "content_block_delta", "index": 0,
        "delta": {"type": "text_delta", "text": text}
    })));
    out.push_str(&frame(serde_json::json!({"type": "content_block_stop", "index": 0})));
    out.push_str(&frame(serde_json::json!({
        "type": "message_delta",
        "delta": {"stop_reason": stop_reason},
        "usage": {"input_tokens": 100, "output_tokens": 20, "thinking_tokens": 0}
    })));
    out.push_str(&frame(serde_json::json!({"type": "message_stop"})));
    out.push_str("data: [DONE]\n\n");
    out
}

/// A streamed turn carrying a thinking block before the visible text.
pub fn sse_text_turn_with_thinking(thinking: &str, text: &str, stop_reason: &str) -> String {
    let mut out = String::new();
    out.push_str(&frame(serde_json::json!({"type": "message_start", "message": {"usage": {}}})));
    out.push_str(&frame(serde_json::json!({
        "type": "content_block_start", "index": 0,
        "content_block": {"type": "thinking", "thinking": ""}
    })));
    out.push_str(&frame(serde_json::json!({
        "type": "content_block_delta", "index": 0,
        "delta": {"type": "thinking_delta", "thinking": thinking}
    })));
    out.push_str(&frame(serde_json::json!({"type": "content_block_stop", "index": 0})));
    out.push_str(&frame(serde_json::json!({
        "type": "content_block_start", "index": 1,
        "content_block": {"type": "text", "text": ""}
    })));
    out.push_str(&frame(serde_json::json!({
        "type": "content_block_delta", "index": 1,
        "delta": {"type": "text_delta", "text": text}
    })));
    out.push_str(&frame(serde_json::json!({"type": "content_block_stop", "index": 1})));
    out.push_str(&frame(serde_json::json!({
        "type": "message_delta",
        "delta": {"stop_reason": stop_reason},
        "usage": {"input_tokens": 100, "output_tokens": 20, "thinking_tokens": 40}
    })));
    out.push_str(&frame(serde_json::json!({"type": "message_stop"})));
    out.push_str("data: [DONE]\n\n");
    out
}

/// A streamed turn that requests a single tool call with no visible text.
pub fn sse_tool_use_turn(tool_id: &str, tool_name: &str, input: &Value) -> String {
    let mut out = String::new();
    out.push_str(&frame(serde_json::json!({"type": "message_start", "message": {"usage": {}}})));
    out.push_str(&frame(serde_json::json!({
        "type": "content_block_start", "index": 0,
        "content_block": {"type": "tool_use", "id": tool_id, "name": tool_name}
    })));
    out.push_str(&frame(serde_json::json!({
        "type": "content_block_delta", "index": 0,
        "delta": {"type": "input_json_delta", "partial_json": input.to_string()}
    })));
    out.push_str(&frame(serde_json::json!({"type": "content_block_stop", "index": 0})));
    out.push_str(&frame(serde_json::json!({
        "type": "message_delta",
        "delta": {"stop_reason": "tool_use"},
        "usage": {"input_tokens": 100, "output_tokens": 20, "thinking_tokens": 0}
    })));
    out.push_str(&frame(serde_json::json!({"type": "message_stop"})));
    out.push_str("data: [DONE]\n\n");
    out
}
