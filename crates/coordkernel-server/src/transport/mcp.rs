// coordkernel-server/src/transport/mcp.rs
// ============================================================================
// Module: MCP Transport
// Description: JSON-RPC 2.0 over HTTP, with an async enqueue/poll session
//              model in place of a persistent stream.
// Purpose: spec.md §4.13 — initialize handshake, tools/list, tools/call.
// Dependencies: axum, coordkernel-core, rand, tokio
// ============================================================================

//! ## Overview
//! `POST /v1/mcp` handles `initialize` synchronously (the caller needs the
//! `Mcp-Session-Id` it hands back before it can do anything else) and
//! enqueues every other method, returning `202 Accepted` immediately;
//! `GET /v1/mcp` long-polls that session's response queue for up to two
//! seconds before returning `204 No Content`. This keeps the gate's
//! single-shot pipeline (spec.md §4.5) decoupled from however long a caller
//! takes to come back and collect its result.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use coordkernel_core::tooling::ToolName;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::GateError;
use crate::gate::GateRequest;
use crate::rate_limit::Tier;
use crate::transport::AppState;
use crate::transport::dispatch_router;

const SESSION_HEADER: &str = "mcp-session-id";
const POLL_WINDOW: Duration = Duration::from_millis(2000);
const POLL_STEP: Duration = Duration::from_millis(50);
const PROTOCOL_VERSION: &str = "2025-03-26";

// ============================================================================
// SECTION: Wire Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    jsonrpc: String,
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    fn from_gate_error(id: Value, err: &GateError) -> Self {
        Self::err(id, err.json_rpc_code(), err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// ============================================================================
// SECTION: Session Registry
// ============================================================================

struct SessionEntry {
    queue: VecDeque<Value>,
    last_seen: Instant,
}

/// Live MCP sessions: a session id maps to a queue of responses awaiting
/// collection by the next `GET /v1/mcp` poll.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: Mutex::new(HashMap::new()) }
    }

    async fn create(&self) -> String {
        let id = generate_session_id();
        self.sessions.lock().await.insert(
            id.clone(),
            SessionEntry {
                queue: VecDeque::new(),
                last_seen: Instant::now(),
            },
        );
        id
    }

    async fn exists(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    async fn push(&self, session_id: &str, response: Value) {
        if let Some(entry) = self.sessions.lock().await.get_mut(session_id) {
            entry.queue.push_back(response);
            entry.last_seen = Instant::now();
        }
    }

    async fn pop(&self, session_id: &str) -> Option<Value> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(session_id)?;
        entry.last_seen = Instant::now();
        entry.queue.pop_front()
    }

    async fn teardown(&self, session_id: &str) -> bool {
        self.sessions.lock().await.remove(session_id).is_some()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.r#gen();
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// The MCP routes, mounted under `/v1/mcp`.
#[must_use]
pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/v1/mcp", post(post_mcp).get(get_mcp).delete(delete_mcp))
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

async fn post_mcp(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    if let Err(response) = check_host_allowed(&state, &headers) {
        return response;
    }

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_err) => {
            let response = JsonRpcResponse::err(Value::Null, -32_700, "parse error");
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };
    let _ = &request.jsonrpc;

    match request.method.as_str() {
        "initialize" => handle_initialize(&state, request.id).await,
        "tools/list" => handle_tools_list(request.id),
        "tools/call" => handle_tools_call(&state, &headers, request).await,
        other => {
            let response = JsonRpcResponse::err(request.id, -32_601, format!("unknown method `{other}`"));
            (StatusCode::NOT_FOUND, Json(response)).into_response()
        }
    }
}

async fn handle_initialize(state: &AppState, id: Value) -> Response {
    let session_id = state.sessions.create().await;
    let result = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": {"name": "coordkernel-server", "version": env!("CARGO_PKG_VERSION")},
        "capabilities": {"tools": {}},
    });
    let response = JsonRpcResponse::ok(id, result);
    let mut headers = HeaderMap::new();
    if let Ok(value) = axum::http::HeaderValue::from_str(&session_id) {
        headers.insert("Mcp-Session-Id", value);
    }
    (StatusCode::OK, headers, Json(response)).into_response()
}

fn handle_tools_list(id: Value) -> Response {
    let tools: Vec<Value> = ToolName::all().iter().map(|tool| json!({"name": tool.as_str()})).collect();
    let response = JsonRpcResponse::ok(id, json!({"tools": tools}));
    (StatusCode::OK, Json(response)).into_response()
}

async fn handle_tools_call(state: &AppState, headers: &HeaderMap, request: JsonRpcRequest) -> Response {
    let Some(session_id) = session_header(headers) else {
        let response = JsonRpcResponse::err(request.id, -32_001, "missing Mcp-Session-Id header");
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    };
    if !state.sessions.exists(&session_id).await {
        let response = JsonRpcResponse::err(request.id, -32_001, "unknown or expired session");
        return (StatusCode::NOT_FOUND, Json(response)).into_response();
    }

    let Some(params) = request.params else {
        let response = JsonRpcResponse::err(request.id, -32_600, "missing params");
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    };
    let params: ToolCallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => {
            let response = JsonRpcResponse::err(request.id, -32_600, format!("invalid params: {err}"));
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };
    let Some(tool) = ToolName::parse(&params.name) else {
        let response = JsonRpcResponse::err(request.id, -32_601, format!("unknown tool `{}`", params.name));
        return (StatusCode::BAD_REQUEST, Json(response)).into_response();
    };

    let bearer_token = bearer_token(headers).unwrap_or_default();
    let gate_request = GateRequest {
        bearer_token,
        client_ip: None,
        tool,
        endpoint: "/v1/mcp".to_string(),
        claimed_source: dispatch_router::claimed_source(tool, &params.arguments),
        session_id: dispatch_router::session_id_arg(&params.arguments),
        tier: Tier::Free,
    };

    let ctx = dispatch_router::ToolContext::from_state(state);
    let arguments = params.arguments;
    let outcome = state
        .gate
        .call(gate_request, move |auth, _correlation_id| async move { dispatch_router::invoke(&ctx, auth, tool, arguments).await })
        .await;

    let response = match outcome.outcome {
        Ok(result) => JsonRpcResponse::ok(request.id, result),
        Err(err) => JsonRpcResponse::from_gate_error(request.id, &err),
    };
    state.sessions.push(&session_id, serde_json::to_value(&response).unwrap_or(Value::Null)).await;

    StatusCode::ACCEPTED.into_response()
}

async fn get_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if !state.sessions.exists(&session_id).await {
        return StatusCode::NOT_FOUND.into_response();
    }

    let deadline = Instant::now() + POLL_WINDOW;
    loop {
        if let Some(response) = state.sessions.pop(&session_id).await {
            return (StatusCode::OK, Json(response)).into_response();
        }
        if Instant::now() >= deadline {
            return StatusCode::NO_CONTENT.into_response();
        }
        sleep(POLL_STEP).await;
    }
}

async fn delete_mcp(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.sessions.teardown(&session_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

// ============================================================================
// SECTION: Header Helpers
// ============================================================================

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers.get(SESSION_HEADER)?.to_str().ok().map(ToString::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(ToString::to_string)
}

fn check_host_allowed(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let allowlist = &state.config.server.dns_rebind_allowlist;
    if allowlist.is_empty() {
        return Ok(());
    }
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(':').next().unwrap_or(value));
    match host {
        Some(host) if allowlist.iter().any(|allowed| allowed == host) => Ok(()),
        _ => {
            let response = JsonRpcResponse::err(Value::Null, -32_600, "host not in allow-list");
            Err((StatusCode::FORBIDDEN, Json(response)).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_round_trips_a_response() {
        let registry = SessionRegistry::new();
        let id = registry.create().await;
        assert!(registry.exists(&id).await);
        registry.push(&id, json!({"ok": true})).await;
        assert_eq!(registry.pop(&id).await, Some(json!({"ok": true})));
        assert_eq!(registry.pop(&id).await, None);
    }

    #[tokio::test]
    async fn teardown_removes_the_session() {
        let registry = SessionRegistry::new();
        let id = registry.create().await;
        assert!(registry.teardown(&id).await);
        assert!(!registry.exists(&id).await);
    }
}
