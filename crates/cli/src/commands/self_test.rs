//! `self-test` command: initialise every module, run one cycle, report.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use orderflow_core::config_loader::DEFAULT_CONFIG_PATH;
use orderflow_orchestrator::IndicatorManager;

use super::{build_context, load_config};

#[derive(Args, Debug, Clone)]
pub struct SelfTestArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "ORDERFLOW_CONFIG")]
    pub config: PathBuf,

    /// Print the status report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run_self_test(args: SelfTestArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let context = build_context(config).await?;
    let manager = IndicatorManager::new(context)?;

    let passed = manager.run_startup_tests().await;
    let report = manager.status_report(chrono::Utc::now());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for module in &report.modules {
            println!(
                "{:<14} {:<9} {}",
                module.module,
                module.health.as_str(),
                module.last_error.as_deref().unwrap_or("ok")
            );
        }
    }

    // Releases feeds and runs the final flush
    manager.stop();
    manager.run().await;

    if !passed {
        bail!("one or more modules failed their self-test");
    }
    Ok(())
}
