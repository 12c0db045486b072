//! `run` command: start every configured module and serve until Ctrl+C.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use orderflow_core::config_loader::DEFAULT_CONFIG_PATH;
use orderflow_orchestrator::IndicatorManager;

use super::{build_context, load_config};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "ORDERFLOW_CONFIG")]
    pub config: PathBuf,
}

pub async fn run_service(args: RunArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let context = build_context(config).await?;
    let manager = IndicatorManager::new(context)?;

    if !manager.run_startup_tests().await {
        tracing::warn!("Some modules failed their self-test and start degraded");
    }

    let shutdown = manager.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, initiating shutdown"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        shutdown.trigger();
    });

    manager.run().await;

    let report = manager.status_report(chrono::Utc::now());
    tracing::info!(
        overall = report.overall.as_str(),
        unhealthy = ?report.unhealthy(),
        "Final status"
    );
    Ok(())
}
