//! Hardware Line Abstraction
//!
//! Everything the capture path needs from the analyzer wiring. All inputs
//! are active low: `Level::Low` on `live` means a conversion is in progress,
//! on `ready` means data is waiting on the bus.

use crate::DeviceError;
use std::sync::Arc;

/// Logic level of an input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Handshake input lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// Live time monitor
    Live,
    /// Data ready
    Ready,
}

/// Interrupt source, one per handshake line
pub type Irq = Line;

/// Result of an interrupt top half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Fully handled in the top half
    Handled,
    /// Run the threaded handler for this interrupt
    WakeThread,
}

/// Receiver of line interrupts.
///
/// The line driver calls [`IrqHandler::top_half`] as soon as an edge is seen,
/// passing the timestamp taken on entry, and runs [`IrqHandler::threaded`]
/// from its interrupt thread when the top half asks for it.
pub trait IrqHandler: Send + Sync {
    /// Fast path: must not block
    fn top_half(&self, irq: Irq, timestamp_ns: u64) -> IrqReturn;

    /// Deferred path: may take slightly longer, still bounded
    fn threaded(&self, irq: Irq);
}

/// Analyzer wiring: two handshake inputs, a parallel data bus, an
/// acknowledge output and the RUN/ENABLE controls.
pub trait HandshakeLines: Send + Sync + 'static {
    /// Take exclusive ownership of every line
    fn claim(&self) -> Result<(), DeviceError>;

    /// Give the lines back
    fn release(&self);

    /// Sample an input line
    fn level(&self, line: Line) -> Level;

    /// Sample the raw (not yet complemented) data bus
    fn sample_bus(&self) -> u16;

    /// Short acknowledge pulse telling the analyzer its data was taken
    fn pulse_ack(&self);

    /// Drive the RUN output
    fn set_run(&self, on: bool);

    /// Drive the ADC ENABLE output
    fn set_enable(&self, on: bool);

    /// Route both line interrupts to `handler`
    fn arm(&self, handler: Arc<dyn IrqHandler>) -> Result<(), DeviceError>;

    /// Stop delivering interrupts
    fn disarm(&self);
}
