//! # Admission Gateway - Main Entry Point
//!
//! Loads configuration, initializes logging and metrics, builds the gateway
//! and serves until SIGINT or SIGTERM.
//!
//! Configuration is read from `GATEWAY_CONFIG_PATH` (default
//! `config/gateway.yaml`); a missing file falls back to built-in defaults and
//! `GATEWAY_*` environment overrides.

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use admission_gateway::observability::{init_logging, install_prometheus_exporter};
use admission_gateway::{GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("GATEWAY_CONFIG_PATH")
        .unwrap_or_else(|_| "config/gateway.yaml".to_string());

    let config = GatewayConfig::load_or_default(&config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_logging(&config.observability.logging).context("Failed to initialize logging")?;
    info!("Starting Admission Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    install_prometheus_exporter(&config.observability.metrics)
        .context("Failed to install metrics exporter")?;

    let server = match GatewayServer::new(&config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start gateway: {}", e);
            return Err(e.into());
        }
    };

    info!("Admission Gateway ready on {}", server.bind_addr());
    server.serve(shutdown_signal()).await?;

    info!("Admission Gateway shutdown complete");
    Ok(())
}

/// Resolve on the first of SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
