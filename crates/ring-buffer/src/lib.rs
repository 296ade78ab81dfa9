//! Lock-Free Ring Buffer
//!
//! Fixed-capacity SPSC ring carrying event records from the capture path
//! (producer) to the device reader (consumer). Unlike a telemetry ring it
//! never overwrites: a push into a full ring is refused and the producer is
//! expected to apply backpressure.

mod buffer;

pub use buffer::{RingBuffer, DEFAULT_CAPACITY};

use thiserror::Error;

/// Ring buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Every usable slot holds unread data
    #[error("Ring buffer full ({0} slots in use)")]
    Full(usize),
}
