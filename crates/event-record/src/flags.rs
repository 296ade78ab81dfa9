//! Staging Buffer Flags

use std::fmt;

/// Bitmask stored in the staging header and reported by `stat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(i32);

impl Flags {
    /// Acquisition requested by the client
    pub const RUN: Flags = Flags(1);
    /// Acquisition suspended because the staging buffer filled up
    pub const PAUSE: Flags = Flags(2);
    /// Dispatcher is appending
    pub const WRITER_BUSY: Flags = Flags(4);
    /// Server is draining
    pub const READER_BUSY: Flags = Flags(8);

    /// Empty mask
    pub const fn empty() -> Self {
        Flags(0)
    }

    /// Build from the raw header value
    pub const fn from_bits(bits: i32) -> Self {
        Flags(bits)
    }

    /// Raw header value
    pub const fn bits(&self) -> i32 {
        self.0
    }

    /// True if every bit of `other` is set
    pub const fn contains(&self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set
    pub const fn intersects(&self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    /// Copy with `other` set
    pub const fn with(self, other: Flags) -> Self {
        Flags(self.0 | other.0)
    }

    /// Copy with `other` cleared
    pub const fn without(self, other: Flags) -> Self {
        Flags(self.0 & !other.0)
    }

    /// Little-endian encoding used by the `stat` reply
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Decode a `stat` reply
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Flags(i32::from_le_bytes(bytes))
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        self.with(rhs)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Flags::RUN, "RUN"),
            (Flags::PAUSE, "PAUSE"),
            (Flags::WRITER_BUSY, "WRITER_BUSY"),
            (Flags::READER_BUSY, "READER_BUSY"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "STOP")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}
