//! MCA Acquisition Daemon - Main Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use daq::{init_logging, DaqSettings, Pipeline};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mca-daq")]
#[command(about = "Multichannel analyzer acquisition daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        DaqSettings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    init_logging(&settings.log_level, settings.json_logs)?;

    info!("=== MCA DAQ v{} ===", env!("CARGO_PKG_VERSION"));
    let pipeline = Pipeline::start(&settings).await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupt received, shutting down");
        }
        _ = pipeline.stopped() => {
            warn!("Acquisition loop ended, shutting down");
        }
    }

    let report = pipeline.shutdown().await;
    if let Some(stats) = report.stats {
        info!(
            received = stats.received,
            staged = stats.staged,
            dropped = stats.dropped,
            overflows = stats.overflows,
            "Run finished"
        );
    }
    if let Some(conversions) = report.conversions {
        info!("Simulated analyzer completed {} conversions", conversions);
    }
    Ok(())
}
