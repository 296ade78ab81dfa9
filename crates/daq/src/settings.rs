//! Daemon Configuration
//!
//! Layered as built-in defaults, then an optional TOML file, then
//! `MCA_DAQ_*` environment variables.

use config::{Config, Environment, File};
use dispatcher::DispatcherConfig;
use event_record::Resolution;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Device value selecting the in-process simulated analyzer
pub const SIMULATED_DEVICE: &str = "simulated";

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A source could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A value is out of range
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Daemon settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaqSettings {
    /// trace, debug, info, warn or error
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    pub bind_address: String,
    pub port: u16,
    /// Shared segment name
    pub segment_name: String,
    /// Directory holding the segment file (default: `/dev/shm`)
    pub shm_dir: Option<PathBuf>,
    /// `simulated` or a character device path
    pub device: String,
    /// ADC resolution in bits (10..=16)
    pub resolution_bits: u8,
    pub run_poll_ms: u64,
    pub idle_poll_ms: u64,
    /// Sleep while the other side holds the staging buffer
    pub busy_poll_ms: u64,
    pub status_interval_ms: u64,
    /// Time each loop gets to finish after shutdown is requested
    pub shutdown_grace_ms: u64,
    /// Simulated analyzer pulse rate
    pub sim_rate_hz: f64,
    /// Simulated analyzer conversion time
    pub sim_conversion_us: u64,
}

impl Default for DaqSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            bind_address: "0.0.0.0".to_string(),
            port: wire_protocol::DEFAULT_PORT,
            segment_name: "mca-daq".to_string(),
            shm_dir: None,
            device: SIMULATED_DEVICE.to_string(),
            resolution_bits: Resolution::default().bits(),
            run_poll_ms: 10,
            idle_poll_ms: 1000,
            busy_poll_ms: 1,
            status_interval_ms: 1000,
            shutdown_grace_ms: 2000,
            sim_rate_hz: 1000.0,
            sim_conversion_us: 20,
        }
    }
}

impl DaqSettings {
    /// Load and validate settings. A missing `path` means defaults plus
    /// environment only; a given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Self = builder
            .add_source(
                Environment::with_prefix("MCA_DAQ")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check ranges the type system does not
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.resolution()?;

        let intervals = [
            ("run_poll_ms", self.run_poll_ms),
            ("idle_poll_ms", self.idle_poll_ms),
            ("busy_poll_ms", self.busy_poll_ms),
            ("status_interval_ms", self.status_interval_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(SettingsError::Invalid {
                field: "log_level",
                reason: format!("unknown level {:?}", self.log_level),
            });
        }
        if self.segment_name.trim_start_matches('/').is_empty() {
            return Err(SettingsError::Invalid {
                field: "segment_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.is_simulated() && (self.sim_rate_hz.is_nan() || self.sim_rate_hz <= 0.0) {
            return Err(SettingsError::Invalid {
                field: "sim_rate_hz",
                reason: format!("{} is not a positive rate", self.sim_rate_hz),
            });
        }
        Ok(())
    }

    pub fn resolution(&self) -> Result<Resolution, SettingsError> {
        Resolution::new(self.resolution_bits).map_err(|e| SettingsError::Invalid {
            field: "resolution_bits",
            reason: e.to_string(),
        })
    }

    pub fn is_simulated(&self) -> bool {
        self.device == SIMULATED_DEVICE
    }

    /// Segment file location
    pub fn segment_path(&self) -> PathBuf {
        match &self.shm_dir {
            Some(dir) => dir.join(self.segment_name.trim_start_matches('/')),
            None => staging::segment_path(&self.segment_name),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            run_poll: Duration::from_millis(self.run_poll_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            busy_poll: Duration::from_millis(self.busy_poll_ms),
            status_interval: Duration::from_millis(self.status_interval_ms),
        }
    }

    pub fn busy_poll(&self) -> Duration {
        Duration::from_millis(self.busy_poll_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn sim_conversion(&self) -> Duration {
        Duration::from_micros(self.sim_conversion_us)
    }
}
