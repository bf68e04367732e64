//! Startup wiring: turns a [`HatagoConfig`] into a running set of
//! upstreams, a tool surface, and an axum app — the part of the gateway
//! that owns its process-wide mutable state (session store, upstream
//! registry, metrics counters), each constructed once here and handed
//! down, never as an implicit singleton.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use hatago_client::http::{HttpBackend, HttpBackendConfig};
use hatago_client::stdio::StdioBackend;
use hatago_client::Backend;
use hatago_core::config::HatagoConfig;
use hatago_core::session::{SessionStore, SessionStoreConfig};
use hatago_core::upstream::{EndpointDescriptor, ToolFilter, UpstreamId, UpstreamSpec};
use hatago_proxy::{CapabilityRouter, UpstreamRegistry};
use hatago_runner::Runner;
use hatago_server::{Plugin, ToolRouter};
use hatago_transport::{MetricsState, TransportConfig, TransportState};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("plugin host failed: {0}")]
    Server(#[from] hatago_server::ServerError),

    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Everything the axum app and its background tasks need to keep
/// running, bundled so `main` can hold one value for the process'
/// lifetime.
pub struct Gateway {
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<UpstreamRegistry>,
    pub transport: Arc<TransportState>,
    pub metrics: Arc<MetricsState>,
    pub runner: Arc<Runner>,
    pub extra_routes: Vec<axum::Router>,
}

/// Launch and register one HTTP upstream. A failure here is logged and
/// swallowed by the caller — one upstream's startup failure must never
/// abort the gateway.
async fn start_http_upstream(
    spec: &UpstreamSpec,
    url: &str,
    registry: &UpstreamRegistry,
) -> Result<(), hatago_proxy::ProxyError> {
    let backend = HttpBackend::new(HttpBackendConfig {
        url: url.to_string(),
        auth: spec.auth.clone(),
        timeout: spec.timeout,
    })
    .map_err(hatago_proxy::ProxyError::Backend)?;
    registry
        .register(spec.id.clone(), Arc::new(backend), spec.tool_filter.clone())
        .await
}

/// Launch and register one subprocess upstream, then spawn the task that
/// re-registers it with fresh stdio on every runner-driven auto-restart.
async fn start_subprocess_upstream(
    spec: &UpstreamSpec,
    launch_spec: &hatago_core::upstream::SubprocessLaunchSpec,
    runner: &Runner,
    registry: Arc<UpstreamRegistry>,
) -> Result<(), hatago_runner::RunnerError> {
    let (mut stdio, restarts) = runner.launch(spec.id.clone(), launch_spec.clone()).await?;
    let stdout = stdio
        .stdout
        .take()
        .ok_or_else(|| hatago_runner::RunnerError::ExitedDuringStartup(spec.id.0.clone()))?;
    let stdin = stdio
        .stdin
        .take()
        .ok_or_else(|| hatago_runner::RunnerError::ExitedDuringStartup(spec.id.0.clone()))?;

    let backend: Arc<dyn Backend> = Arc::new(StdioBackend::new(stdout, stdin, spec.timeout));
    registry
        .register(spec.id.clone(), backend, spec.tool_filter.clone())
        .await
        .map_err(|e| hatago_runner::RunnerError::SpawnFailed {
            upstream: spec.id.0.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;

    watch_restarts(spec.id.clone(), registry, spec.tool_filter.clone(), spec.timeout, restarts);
    Ok(())
}

fn watch_restarts(
    id: UpstreamId,
    registry: Arc<UpstreamRegistry>,
    tool_filter: ToolFilter,
    timeout: std::time::Duration,
    mut restarts: tokio::sync::mpsc::UnboundedReceiver<hatago_runner::ChildStdio>,
) {
    tokio::spawn(async move {
        while let Some(mut stdio) = restarts.recv().await {
            let (Some(stdout), Some(stdin)) = (stdio.stdout.take(), stdio.stdin.take()) else {
                warn!(upstream = %id, "restarted subprocess missing stdio, skipping re-registration");
                continue;
            };
            let backend: Arc<dyn Backend> = Arc::new(StdioBackend::new(stdout, stdin, timeout));
            info!(upstream = %id, "subprocess restarted, re-registering with fresh stdio");
            if let Err(e) = registry
                .register(id.clone(), backend, tool_filter.clone())
                .await
            {
                error!(upstream = %id, error = %e, "failed to re-register restarted upstream");
            }
        }
    });
}

pub async fn build_gateway(
    config: &HatagoConfig,
    plugins: &[Arc<dyn Plugin>],
) -> Result<Gateway, StartupError> {
    let sessions = Arc::new(SessionStore::new(SessionStoreConfig::default()));
    let runner = Arc::new(Runner::new());

    let registry = Arc::new(UpstreamRegistry::new(
        config.proxy.namespace_strategy,
        config.proxy.namespace.clone(),
        config.proxy.conflict_resolution,
    ));

    for spec in &config.proxy.servers {
        let result = match &spec.endpoint {
            EndpointDescriptor::Http { url } => {
                start_http_upstream(spec, url, &registry).await.map_err(|e| e.to_string())
            }
            EndpointDescriptor::Subprocess(launch_spec) => {
                start_subprocess_upstream(spec, launch_spec, &runner, Arc::clone(&registry))
                    .await
                    .map_err(|e| e.to_string())
            }
        };
        if let Err(e) = result {
            warn!(upstream = %spec.id, error = %e, "upstream failed to start, continuing without it");
        }
    }

    let proxy_router = Arc::new(CapabilityRouter::new(Arc::clone(&registry)));
    let tools = Arc::new(ToolRouter::new(
        proxy_router,
        "hatago".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    ));

    let extra_routes =
        hatago_server::load_plugins(plugins, Arc::clone(&tools), Arc::clone(&sessions)).await?;
    if !extra_routes.is_empty() {
        info!(count = extra_routes.len(), "plugins registered extra routes");
    }

    let transport = Arc::new(TransportState::new(
        TransportConfig::default(),
        Arc::clone(&sessions),
        tools,
    ));
    transport.mark_ready();

    let metrics = Arc::new(MetricsState {
        sink: hatago_core::metrics::PrometheusSink::install()?,
    });

    Arc::clone(&sessions).spawn_sweeper();

    Ok(Gateway {
        sessions,
        registry,
        transport,
        metrics,
        runner,
        extra_routes,
    })
}
