//! MCA Event Record
//!
//! Defines the 16-byte event record that travels unchanged from the capture
//! stage through the device ring, the shared staging buffer and the wire.
//! Also holds the constants every stage agrees on: buffer size, staging
//! flags and ADC resolution.

mod error;
mod flags;
mod record;

pub use error::RecordError;
pub use flags::Flags;
pub use record::{decode_all, encode_all, EventRecord, RECORD_SIZE};

/// Number of slots in the device ring and in the staging buffer
pub const SIZE: usize = 10_000;

/// Lowest valid channel; codes below it are remapped by the capture stage
pub const MIN_CHANNEL: u16 = 2;

/// ADC resolution in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution(u8);

impl Resolution {
    /// Smallest supported resolution
    pub const MIN_BITS: u8 = 10;
    /// Largest supported resolution
    pub const MAX_BITS: u8 = 16;

    /// Create a resolution, rejecting bit counts outside 10..=16
    pub fn new(bits: u8) -> Result<Self, RecordError> {
        if (Self::MIN_BITS..=Self::MAX_BITS).contains(&bits) {
            Ok(Self(bits))
        } else {
            Err(RecordError::InvalidResolution(bits))
        }
    }

    /// Number of bits
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Mask covering every data-bus line
    pub fn mask(&self) -> u16 {
        ((1u32 << self.0) - 1) as u16
    }

    /// Number of addressable channels (2^bits)
    pub fn channels(&self) -> u32 {
        1u32 << self.0
    }
}

impl Default for Resolution {
    /// 13 data lines, as wired on the reference ADC
    fn default() -> Self {
        Self(13)
    }
}
