// coordkernel-server/src/transport/rest.rs
// ============================================================================
// Module: REST Transport
// Description: Pattern-matched HTTP routes over the same tool pipeline the
//              MCP transport drives, plus bearer-secret internal endpoints
//              for the external scheduler.
// Purpose: spec.md §4.14 — one envelope shape, one status-code mapping.
// Dependencies: axum, coordkernel-core
// ============================================================================

//! ## Overview
//! Every external route resolves to the same [`crate::gate::Gate::call`]
//! pipeline [`crate::transport::mcp`] drives, just with its tool name and
//! arguments built from a path/query/body instead of a JSON-RPC envelope.
//! The internal routes skip the gate entirely — they run a control loop
//! directly, authenticated by a fixed bearer secret rather than a tenant's
//! API key — because a scheduler tick is not a tenant's tool call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use coordkernel_core::tooling::ToolName;
use serde_json::Value;
use serde_json::json;

use crate::control_loops;
use crate::error::GateError;
use crate::gate::GateRequest;
use crate::rate_limit::Tier;
use crate::transport::AppState;
use crate::transport::dispatch_router;

// ============================================================================
// SECTION: Router
// ============================================================================

/// The REST routes, mounted under `/v1`.
#[must_use]
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tasks", post(create_task).get(get_tasks))
        .route("/v1/tasks/{id}/claim", post(claim_task))
        .route("/v1/tasks/{id}/complete", post(complete_task))
        .route("/v1/messages", post(send_message).get(get_messages))
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/{id}", post(update_session))
        .route("/v1/questions", post(ask_question))
        .route("/v1/questions/{id}", get(get_response))
        .route("/v1/alerts", post(send_alert))
        .route("/v1/dreams", get(dream_peek))
        .route("/v1/dreams/{id}/activate", post(dream_activate))
        .route("/v1/metrics", get(get_operational_metrics))
        .route("/v1/internal/wake", post(internal_wake))
        .route("/v1/internal/cleanup", post(internal_cleanup))
        .route("/v1/internal/reconcile-tasks", post(internal_reconcile_tasks))
        .route("/v1/internal/reconcile-sessions", post(internal_reconcile_sessions))
        .route("/v1/internal/health-check", post(internal_health_check))
        .route("/v1/internal/stale-sessions", post(internal_stale_sessions))
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

fn envelope_ok(state: &AppState, data: Value) -> Response {
    let body = json!({
        "success": true,
        "data": data,
        "meta": {"timestamp": state.store.server_timestamp().as_unix_millis()},
    });
    (StatusCode::OK, Json(body)).into_response()
}

fn envelope_err(state: &AppState, err: &GateError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "success": false,
        "error": {"message": err.to_string(), "reason": err.audit_reason()},
        "meta": {"timestamp": state.store.server_timestamp().as_unix_millis()},
    });
    (status, Json(body)).into_response()
}

// ============================================================================
// SECTION: Gated Call Helper
// ============================================================================

async fn call_tool(state: &AppState, headers: &HeaderMap, tool: ToolName, endpoint: &str, arguments: Value) -> Response {
    let bearer_token = bearer_token(headers).unwrap_or_default();
    let gate_request = GateRequest {
        bearer_token,
        client_ip: client_ip(headers),
        tool,
        endpoint: endpoint.to_string(),
        claimed_source: dispatch_router::claimed_source(tool, &arguments),
        session_id: dispatch_router::session_id_arg(&arguments),
        tier: Tier::Free,
    };
    let ctx = dispatch_router::ToolContext::from_state(state);
    let outcome = state
        .gate
        .call(gate_request, move |auth, _correlation_id| async move { dispatch_router::invoke(&ctx, auth, tool, arguments).await })
        .await;
    match outcome.outcome {
        Ok(data) => envelope_ok(state, data),
        Err(err) => envelope_err(state, &err),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(ToString::to_string)
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers.get("x-forwarded-for")?.to_str().ok().map(ToString::to_string)
}

fn with_field(mut body: Value, field: &str, value: Value) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert(field.to_string(), value);
    } else {
        body = json!({field: value});
    }
    body
}

fn query_to_value(query: &HashMap<String, String>) -> Value {
    let map = query.iter().map(|(key, value)| (key.clone(), Value::String(value.clone()))).collect();
    Value::Object(map)
}

// ============================================================================
// SECTION: Task Routes
// ============================================================================

async fn create_task(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    call_tool(&state, &headers, ToolName::CreateTask, "/v1/tasks", body).await
}

async fn get_tasks(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    call_tool(&state, &headers, ToolName::GetTasks, "/v1/tasks", query_to_value(&query)).await
}

async fn claim_task(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let arguments = with_field(body, "taskId", Value::String(id));
    call_tool(&state, &headers, ToolName::ClaimTask, "/v1/tasks/{id}/claim", arguments).await
}

async fn complete_task(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let arguments = with_field(body, "taskId", Value::String(id));
    call_tool(&state, &headers, ToolName::CompleteTask, "/v1/tasks/{id}/complete", arguments).await
}

// ============================================================================
// SECTION: Message Routes
// ============================================================================

async fn send_message(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    call_tool(&state, &headers, ToolName::SendMessage, "/v1/messages", body).await
}

async fn get_messages(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    call_tool(&state, &headers, ToolName::GetMessages, "/v1/messages", query_to_value(&query)).await
}

// ============================================================================
// SECTION: Session Routes
// ============================================================================

async fn create_session(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    call_tool(&state, &headers, ToolName::CreateSession, "/v1/sessions", body).await
}

async fn update_session(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    let arguments = with_field(body, "sessionId", Value::String(id));
    call_tool(&state, &headers, ToolName::UpdateSession, "/v1/sessions/{id}", arguments).await
}

async fn list_sessions(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    call_tool(&state, &headers, ToolName::ListSessions, "/v1/sessions", query_to_value(&query)).await
}

// ============================================================================
// SECTION: Signal Routes
// ============================================================================

async fn ask_question(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    call_tool(&state, &headers, ToolName::AskQuestion, "/v1/questions", body).await
}

async fn get_response(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let arguments = json!({"questionId": id});
    call_tool(&state, &headers, ToolName::GetResponse, "/v1/questions/{id}", arguments).await
}

async fn send_alert(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    call_tool(&state, &headers, ToolName::SendAlert, "/v1/alerts", body).await
}

// ============================================================================
// SECTION: Dream Routes
// ============================================================================

async fn dream_peek(State(state): State<AppState>, headers: HeaderMap) -> Response {
    call_tool(&state, &headers, ToolName::DreamPeek, "/v1/dreams", Value::Null).await
}

async fn dream_activate(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let arguments = json!({"dreamId": id});
    call_tool(&state, &headers, ToolName::DreamActivate, "/v1/dreams/{id}/activate", arguments).await
}

// ============================================================================
// SECTION: Metrics Route
// ============================================================================

async fn get_operational_metrics(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    call_tool(&state, &headers, ToolName::GetOperationalMetrics, "/v1/metrics", query_to_value(&query)).await
}

// ============================================================================
// SECTION: Internal Routes
// ============================================================================

fn check_internal_secret(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.config.server.internal_scheduler_secret else {
        return Err(envelope_err(state, &GateError::Auth));
    };
    let Some(provided) = bearer_token(headers) else {
        return Err(envelope_err(state, &GateError::Auth));
    };
    if coordkernel_core::constant_time_eq(&provided, expected) {
        Ok(())
    } else {
        Err(envelope_err(state, &GateError::Auth))
    }
}

fn report_to_value(report: &control_loops::ControlLoopReport) -> Value {
    json!({
        "documentsScanned": report.documents_scanned,
        "documentsMutated": report.documents_mutated,
        "errors": report.errors,
    })
}

async fn internal_wake(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_internal_secret(&state, &headers) {
        return response;
    }
    let batch_size = state.config.control_loops.batch_size;
    let listener = control_loops::HttpHostListener::from_env();
    let mut wake_state = control_loops::WakeDaemonState::default();
    let report = match &listener {
        Some(listener) => control_loops::wake_daemon(state.store.as_ref(), &state.ledger, listener, &mut wake_state, batch_size).await,
        None => return envelope_err(&state, &GateError::Handler("WAKE_HOST_URL not configured".to_string())),
    };
    match report {
        Ok(report) => envelope_ok(&state, report_to_value(&report)),
        Err(err) => envelope_err(&state, &err),
    }
}

async fn internal_cleanup(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_internal_secret(&state, &headers) {
        return response;
    }
    let batch_size = state.config.control_loops.batch_size;
    let results = [
        control_loops::dream_timeout_enforcement(state.store.as_ref(), &state.ledger, batch_size).await,
        control_loops::relay_expiry(state.store.as_ref(), &state.ledger, batch_size).await,
        control_loops::dead_letter_processing(state.store.as_ref(), &state.ledger, batch_size).await,
    ];
    respond_merged(&state, results)
}

async fn internal_reconcile_tasks(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_internal_secret(&state, &headers) {
        return response;
    }
    let batch_size = state.config.control_loops.batch_size;
    let report = control_loops::orphan_revival(state.store.as_ref(), &state.ledger, batch_size).await;
    respond_single(&state, report)
}

async fn internal_reconcile_sessions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_internal_secret(&state, &headers) {
        return response;
    }
    let batch_size = state.config.control_loops.batch_size;
    let report = control_loops::stale_session_detector(state.store.as_ref(), batch_size).await;
    respond_single(&state, report)
}

async fn internal_health_check(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_internal_secret(&state, &headers) {
        return response;
    }
    let Some(dispatcher) = &state.dispatcher else {
        return envelope_ok(&state, json!({"degraded": true, "reason": "no dispatcher configured"}));
    };
    let executor = crate::dispatch::TaskMirrorExecutor::new(dispatcher.as_ref());
    let batch_size = state.config.control_loops.batch_size;
    let report = control_loops::sync_queue_processor(&state.store, &executor, batch_size).await;
    respond_single(&state, report)
}

async fn internal_stale_sessions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = check_internal_secret(&state, &headers) {
        return response;
    }
    let batch_size = state.config.control_loops.batch_size;
    let report = control_loops::stale_session_detector(state.store.as_ref(), batch_size).await;
    respond_single(&state, report)
}

fn respond_single(state: &AppState, report: Result<control_loops::ControlLoopReport, GateError>) -> Response {
    match report {
        Ok(report) => envelope_ok(state, report_to_value(&report)),
        Err(err) => envelope_err(state, &err),
    }
}

fn respond_merged(state: &AppState, results: [Result<control_loops::ControlLoopReport, GateError>; 3]) -> Response {
    let mut merged = control_loops::ControlLoopReport::default();
    for result in results {
        match result {
            Ok(report) => merged.merge(report),
            Err(err) => return envelope_err(state, &err),
        }
    }
    envelope_ok(state, report_to_value(&merged))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_field_inserts_into_an_object_body() {
        let body = with_field(json!({"sessionId": "s1"}), "taskId", Value::String("t1".to_string()));
        assert_eq!(body, json!({"sessionId": "s1", "taskId": "t1"}));
    }

    #[test]
    fn with_field_wraps_a_non_object_body() {
        let body = with_field(Value::Null, "taskId", Value::String("t1".to_string()));
        assert_eq!(body, json!({"taskId": "t1"}));
    }
}
