//! Handshake Capture for Multichannel Analyzers
//!
//! Converts the analyzer's two handshake lines (live time and data ready)
//! plus its parallel data bus into timestamped event records.
//!
//! - [`fsm`]: the capture state machine, free of any hardware access
//! - [`lines`]: the hardware abstraction the capture path drives
//! - [`engine`]: interrupt top/bottom halves wiring the FSM to lines and ring
//! - [`device`]: the open/read/write/release contract seen by the reader
//! - [`simulated`]: a software analyzer for tests and hardware-less runs

pub mod device;
pub mod engine;
pub mod fsm;
pub mod lines;
pub mod simulated;

pub use device::Device;
pub use engine::CaptureEngine;
pub use fsm::{CaptureState, Edge, FsmState, Phase, Transition};
pub use lines::{HandshakeLines, Irq, IrqHandler, IrqReturn, Level, Line};
pub use simulated::{Conversion, SimulatedAnalyzer};

use thiserror::Error;

/// Device interface errors
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Another reader already owns the lines
    #[error("Handshake lines already claimed by another reader")]
    Busy,

    /// Interrupt source could not be armed
    #[error("Unable to arm interrupt on {0:?} line: {1}")]
    Arm(Line, String),
}

/// Current wall-clock time in ns since the Unix epoch
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
