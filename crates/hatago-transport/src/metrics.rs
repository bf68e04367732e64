//! `GET /metrics`: exposes whatever `PrometheusSink` has recorded, in the
//! Prometheus text exposition format. `hatago-core::metrics` supplies the
//! recorder itself.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use hatago_core::metrics::PrometheusSink;

/// Shared handle the router installs once at startup, independent of
/// per-request `TransportState` since metrics outlive any one session.
pub struct MetricsState {
    pub sink: PrometheusSink,
}

pub async fn render(State(state): State<Arc<MetricsState>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.sink.render(),
    )
        .into_response()
}

/// `GET /metrics.json`: same data, for callers that would rather not
/// parse the text exposition format.
pub async fn render_json(State(state): State<Arc<MetricsState>>) -> Response {
    let body = state.sink.render();
    Json(json!({ "prometheus_text": body })).into_response()
}
