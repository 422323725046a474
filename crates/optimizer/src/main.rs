//! Fleet Optimizer - container fleet resource guard daemon
//!
//! Watches every managed instance on this host, remediates resource
//! exhaustion and health failures, and runs scheduled restarts.

use anyhow::{Context, Result};
use fleet_optimizer::{api, config::DaemonConfig};
use optimizer_lib::{
    runtime::{DockerRuntime, ProcHostProbe, ReqwestProbe},
    Optimizer, SystemClock,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const OPTIMIZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fleet-optimizer");

    let config = DaemonConfig::load()?;
    info!(
        state_dir = %config.state_dir.display(),
        tick_interval_secs = config.tick_interval_secs,
        "Optimizer configured"
    );

    let runtime = Arc::new(DockerRuntime::new(config.runtime_config()));
    let probe = Arc::new(ReqwestProbe::new().context("Failed to build HTTP probe client")?);
    let host = Arc::new(ProcHostProbe::new());

    let optimizer = Arc::new(Optimizer::new(
        runtime,
        probe,
        host,
        Arc::new(SystemClock),
        config.optimizer_options(),
    ));
    optimizer
        .logger()
        .log_startup(OPTIMIZER_VERSION, &config.state_dir.display().to_string());

    // Start the tick loop; readiness flips once it is running
    optimizer.start_background_loop().await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let app_state = Arc::new(api::AppState::new(optimizer.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    optimizer.stop().await;
    let _ = shutdown_tx.send(());
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    Ok(())
}
