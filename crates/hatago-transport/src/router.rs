//! Wires the `/mcp` trio, the health/drain probes, and the metrics
//! surface into one `axum::Router`, with a tracing/timeout/compression
//! middleware stack layered over all of it.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::health;
use crate::mcp;
use crate::metrics::{self, MetricsState};
use crate::state::TransportState;

/// Request timeout applied ahead of any per-call admission control in
/// `hatago-proxy` — this is the outer, "don't hang forever" bound, not
/// the limiter's queue timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub fn build_router(state: Arc<TransportState>, metrics: Arc<MetricsState>) -> Router {
    let endpoint = state.config.endpoint_path.clone();

    let mcp_routes = Router::new()
        .route(
            &endpoint,
            post(mcp::post_mcp)
                .get(mcp::get_mcp)
                .delete(mcp::delete_mcp)
                .fallback(mcp::method_not_allowed),
        )
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/health/startup", get(health::startup))
        .route("/drain", post(health::drain))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics::render))
        .route("/metrics.json", get(metrics::render_json))
        .with_state(metrics);

    mcp_routes.merge(metrics_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(CompressionLayer::new()),
    )
}
