use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dockit_terminal::registry::SessionRegistry;
use dockit_terminal::telemetry::Telemetry;
use dockit_terminal::{router, AppState, Cli, ServerConfig};
use exec_bridge::DockerRuntime;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        runtime_host = %config.runtime.host,
        pinned_resource = ?config.pinned_resource,
        auth_enabled = !matches!(config.gate, dockit_terminal::gate::GateConfig::Disabled),
        "starting dockit-terminal"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let state = Arc::new(AppState {
        runtime: DockerRuntime::new(config.runtime.clone()),
        gate: config.gate.build(),
        pinned_resource: config.pinned_resource.clone(),
        registry: SessionRegistry::new(),
        metrics: Some(metrics),
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("dockit-terminal listening on {}", config.listen_addr);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        open_sessions = state.registry.len(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
