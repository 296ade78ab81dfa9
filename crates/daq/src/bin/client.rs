//! MCA Acquisition Client
//!
//! Connects to the daemon, optionally starts a run, polls the staged events
//! into a spectrum and logs running totals.

use anyhow::{Context, Result};
use clap::Parser;
use daq::init_logging;
use daq::session::{run_session, SessionOptions};
use event_record::Resolution;
use std::time::Duration;
use tracing::info;
use wire_protocol::{tcp_endpoint, RunSummary, WireClient, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "mca-client")]
#[command(about = "Poll an MCA acquisition daemon for events", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// ADC resolution in bits (10-16)
    #[arg(short, long, default_value = "13")]
    bits: u8,

    /// Request acquisition before polling
    #[arg(long)]
    start: bool,

    /// Polling duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Interval between `send` requests in milliseconds
    #[arg(short, long, default_value = "200")]
    interval: u64,

    /// Reply timeout in milliseconds
    #[arg(long, default_value = "2000")]
    timeout: u64,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, false)?;
    let resolution = Resolution::new(cli.bits).context("Invalid ADC resolution")?;

    let endpoint = tcp_endpoint(&cli.host, cli.port);
    let mut client = WireClient::connect(&endpoint)
        .await
        .with_context(|| format!("Failed to connect to {}", endpoint))?;
    client.set_timeout(Duration::from_millis(cli.timeout));

    let options = SessionOptions {
        start: cli.start,
        duration: Duration::from_secs(cli.duration),
        poll_interval: Duration::from_millis(cli.interval.max(1)),
        ..Default::default()
    };
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let mut summary = RunSummary::new(resolution);
    run_session(&mut client, &mut summary, &options, interrupt)
        .await
        .context("Session failed")?;

    let spectrum = summary.export();
    let peak = spectrum
        .iter()
        .enumerate()
        .skip(2)
        .max_by_key(|(_, &count)| count)
        .map(|(channel, _)| channel as u64)
        .unwrap_or(0);
    info!(
        real_tenths = spectrum[0],
        live_tenths = spectrum[1],
        peak_channel = peak,
        out_of_range = summary.out_of_range(),
        "Spectrum collected"
    );
    Ok(())
}
