//! MCA Acquisition Daemon
//!
//! Wires the capture device, shared staging segment, dispatcher and wire
//! server into one process.

pub mod pipeline;
pub mod session;
pub mod settings;

pub use pipeline::{Pipeline, RunReport};
pub use settings::{DaqSettings, SettingsError, SIMULATED_DEVICE};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging at `level`, optionally as JSON lines
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
    .context("Failed to set tracing subscriber")
}
