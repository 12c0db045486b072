use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{RunArgs, SelfTestArgs};

#[derive(Parser)]
#[command(name = "orderflow")]
#[command(about = "Order-flow indicator service for Binance Futures", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured indicator module until Ctrl+C
    Run(RunArgs),
    /// Initialise each module, run one cycle and report; non-zero exit on failure
    SelfTest(SelfTestArgs),
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    match cli.command {
        Commands::Run(args) => commands::run_service(args).await?,
        Commands::SelfTest(args) => commands::run_self_test(args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_self_test_with_global_log_file() {
        let cli = Cli::try_parse_from([
            "orderflow",
            "self-test",
            "--config",
            "custom.toml",
            "--json",
            "--log-file",
            "orderflow.log",
        ])
        .unwrap();

        assert_eq!(cli.log_file, Some(PathBuf::from("orderflow.log")));
        match cli.command {
            Commands::SelfTest(args) => {
                assert_eq!(args.config, PathBuf::from("custom.toml"));
                assert!(args.json);
            }
            Commands::Run(_) => panic!("expected self-test"),
        }
    }

    #[test]
    fn test_run_uses_default_config_path() {
        let cli = Cli::try_parse_from(["orderflow", "run"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("config/Orderflow.toml"));
            }
            Commands::SelfTest(_) => panic!("expected run"),
        }
    }
}
