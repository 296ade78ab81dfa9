//! Shared Staging Buffer
//!
//! A named shared-memory segment holding `{count, flags, records[SIZE]}`,
//! written by the dispatcher and drained by the server. Access goes through
//! [`WriterGuard`] and [`ReaderGuard`]: a guard can only be taken while the
//! opposite busy flag is clear, and its own flag is cleared when it drops.

mod buffer;
mod guard;

pub use buffer::{segment_path, StagingBuffer, SEGMENT_SIZE};
pub use guard::{AppendOutcome, ReaderGuard, WriterGuard};

use thiserror::Error;

/// Staging segment errors
#[derive(Debug, Error)]
pub enum StagingError {
    /// Creating, opening or mapping the segment failed
    #[error("Shared segment I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Existing segment does not have the expected layout
    #[error("Shared segment size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}
