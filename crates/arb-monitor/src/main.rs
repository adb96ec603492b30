//! Arbitrage window monitor for paired Kalshi/Polymarket contracts.
//!
//! Usage:
//!   monitor --config <path> [--log-dir <path>]
//!
//! Exit codes:
//!   0   clean shutdown (duration elapsed)
//!   1   configuration invalid
//!   2   unrecoverable I/O
//!   130 interrupted by signal

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use arb_monitor::{AppConfig, ShutdownReason, Supervisor};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "monitor")]
#[command(about = "Kalshi/Polymarket arbitrage window monitor")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Directory for CSV logs, errors.log, and the checkpoint
    #[arg(long, default_value = "data")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env if present.
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = match AppConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err:#}");
            return ExitCode::from(1);
        }
    };
    config.apply_env_overrides();

    init_logging(&config.log_level);

    info!(
        config = %args.config.display(),
        pairs = config.market_pairs.len(),
        "Starting arbitrage monitor"
    );

    let supervisor = Supervisor::new(config, args.log_dir);
    match supervisor.run().await {
        Ok(ShutdownReason::Signal) => ExitCode::from(130),
        Ok(ShutdownReason::DurationElapsed) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Fatal: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: tracing subscriber already installed");
    }
}
