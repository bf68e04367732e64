//! Health and drain surface: the non-MCP endpoints an orchestrator uses to
//! decide whether to route traffic to this instance or finish taking it
//! out of rotation. Split into the three separate probes a production
//! deployment actually wires up (liveness, readiness, startup) plus the
//! drain trigger.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::info;

use crate::state::TransportState;

/// **GET /health/live**: process is up and not wedged. Only false once
/// draining has begun and the process is on its way out.
pub async fn live(State(state): State<Arc<TransportState>>) -> Response {
    if state.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "draining" })))
            .into_response();
    }
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

/// **GET /health/ready**: safe to route new requests to. False until the
/// plugin host has finished startup and again once draining begins.
pub async fn ready(State(state): State<Arc<TransportState>>) -> Response {
    if state.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "draining" })))
            .into_response();
    }
    if !state.is_ready() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "starting" })))
            .into_response();
    }
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

/// **GET /health/startup**: has the gateway ever become ready. Unlike
/// `ready`, this does not flip back once draining starts — it answers
/// "did startup complete", not "can you take traffic right now".
pub async fn startup(State(state): State<Arc<TransportState>>) -> Response {
    if state.is_ready() {
        (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "starting" }))).into_response()
    }
}

/// **POST /drain**: begin graceful shutdown. `post_mcp` and `get_mcp`
/// both check `is_draining` before doing anything else and reject new
/// requests with 503 going forward; requests and streams already in
/// flight are left to finish on their own.
pub async fn drain(State(state): State<Arc<TransportState>>) -> Response {
    state.start_draining();
    info!("drain requested");
    (StatusCode::OK, Json(json!({ "status": "draining" }))).into_response()
}
