//! The Hatago gateway process: loads configuration, wires the transport,
//! proxy, and plugin host together, and serves `/mcp` until told to drain.

mod demo_plugin;
mod startup;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use hatago_core::config::HatagoConfig;
use hatago_core::telemetry::init_tracing;
use hatago_server::Plugin;
use hatago_transport::build_router;

/// Overridden by `HATAGO_CONFIG_PATH`. A missing file is not an error —
/// the gateway falls back to [`HatagoConfig::default`], which runs with
/// no configured upstreams.
#[derive(Parser, Debug)]
#[command(name = "hatago", version, about = "MCP gateway")]
struct Cli {
    #[arg(long, env = "HATAGO_CONFIG_PATH")]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> HatagoConfig {
    let Some(path) = path else {
        return HatagoConfig::default();
    };
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            error!(path = %path.display(), error = %e, "failed to parse config, using defaults");
            HatagoConfig::default()
        }),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read config, using defaults");
            HatagoConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());
    init_tracing(&config.logging);

    let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(demo_plugin::HelloPlugin)];

    let gateway = match startup::build_gateway(&config, &plugins).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "startup failed");
            return std::process::ExitCode::FAILURE;
        }
    };

    let metrics = Arc::clone(&gateway.metrics);
    let mut app = build_router(Arc::clone(&gateway.transport), metrics);
    for route in gateway.extra_routes {
        app = app.merge(route);
    }

    let addr = format!("{}:{}", config.server.hostname, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr, error = %e, "failed to bind listener");
            return std::process::ExitCode::FAILURE;
        }
    };
    info!(addr, "hatago gateway listening");

    let transport = Arc::clone(&gateway.transport);
    let shutdown = async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining");
        transport.start_draining();
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "server loop exited with error");
        return std::process::ExitCode::FAILURE;
    }

    gateway.runner.stop_all().await;
    std::process::ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            return;
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
