//! Event Record Error Types

use thiserror::Error;

/// Errors while decoding records or building record parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Fewer bytes than one record
    #[error("Truncated record: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Byte stream does not end on a record boundary
    #[error("Trailing {0} bytes do not form a whole record")]
    TrailingBytes(usize),

    /// Unsupported ADC resolution
    #[error("ADC resolution of {0} bits is outside 10..=16")]
    InvalidResolution(u8),
}
