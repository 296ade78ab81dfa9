//! Event Dispatcher
//!
//! Polls the capture device, moves every record it returns into the shared
//! staging buffer and relays the client's run/stop requests (the staging RUN
//! flag) back to the device.

mod dispatcher;
mod source;

pub use dispatcher::{DispatchStats, Dispatcher, DispatcherConfig};
pub use source::{CharDevice, EventSource};

use thiserror::Error;

/// Dispatcher errors; each one ends the dispatch loop
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Reading the device failed
    #[error("Device read failed: {0}")]
    Read(#[source] std::io::Error),

    /// Writing a run command to the device failed
    #[error("Device write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Device returned bytes that do not decode
    #[error("Malformed device data: {0}")]
    Record(#[from] event_record::RecordError),
}
