//! Event Record Layout and Codec

use crate::error::RecordError;

/// Size of one encoded record in bytes
pub const RECORD_SIZE: usize = 16;

/// One digitized pulse.
///
/// `#[repr(C)]` keeps the field order and 16-byte size so the record can sit
/// directly in the shared staging segment; the byte codec below is the
/// portable form used on the device and the wire (little-endian).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventRecord {
    /// Conversion start, ns since the Unix epoch
    pub timestamp: u64,
    /// Conversion plus read-back time in ns
    pub dead_time: u32,
    /// Digitized channel
    pub value: u16,
    /// Protocol anomalies seen while producing this record
    pub error_mask: u16,
}

const _: () = assert!(std::mem::size_of::<EventRecord>() == RECORD_SIZE);
const _: () = assert!(std::mem::align_of::<EventRecord>() == 8);

impl EventRecord {
    /// Create a record
    pub fn new(timestamp: u64, dead_time: u32, value: u16, error_mask: u16) -> Self {
        Self {
            timestamp,
            dead_time,
            value,
            error_mask,
        }
    }

    /// Encode into the 16-byte layout
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[8..12].copy_from_slice(&self.dead_time.to_le_bytes());
        out[12..14].copy_from_slice(&self.value.to_le_bytes());
        out[14..16].copy_from_slice(&self.error_mask.to_le_bytes());
        out
    }

    /// Encode into the first 16 bytes of `out`
    ///
    /// # Panics
    /// If `out` is shorter than one record.
    pub fn encode_into(&self, out: &mut [u8]) {
        out[..RECORD_SIZE].copy_from_slice(&self.encode());
    }

    /// Decode from the first 16 bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_SIZE {
            return Err(RecordError::Truncated {
                expected: RECORD_SIZE,
                actual: bytes.len(),
            });
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[0..8]);
        let mut dt = [0u8; 4];
        dt.copy_from_slice(&bytes[8..12]);

        Ok(Self {
            timestamp: u64::from_le_bytes(ts),
            dead_time: u32::from_le_bytes(dt),
            value: u16::from_le_bytes([bytes[12], bytes[13]]),
            error_mask: u16::from_le_bytes([bytes[14], bytes[15]]),
        })
    }
}

/// Encode a batch back to back
pub fn encode_all(records: &[EventRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        out.extend_from_slice(&record.encode());
    }
    out
}

/// Decode a byte stream made of whole records
pub fn decode_all(bytes: &[u8]) -> Result<Vec<EventRecord>, RecordError> {
    let tail = bytes.len() % RECORD_SIZE;
    if tail != 0 {
        return Err(RecordError::TrailingBytes(tail));
    }
    bytes.chunks_exact(RECORD_SIZE).map(EventRecord::decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_field_offsets() {
        let record = EventRecord::new(0x0102_0304_0506_0708, 0x0a0b_0c0d, 0x1fff, 0x0003);
        let bytes = record.encode();
        assert_eq!(&bytes[0..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&bytes[8..12], &[0x0d, 0x0c, 0x0b, 0x0a]);
        assert_eq!(&bytes[12..14], &[0xff, 0x1f]);
        assert_eq!(&bytes[14..16], &[0x03, 0x00]);
    }

    #[test]
    fn test_boundary_values() {
        for record in [
            EventRecord::new(0, 0, 2, 0),
            EventRecord::new(u64::MAX, u32::MAX, 0x1fff, u16::MAX),
            EventRecord::new(1_664_000_000_000_000_000, 0, u16::MAX, 1),
        ] {
            assert_eq!(EventRecord::decode(&record.encode()).unwrap(), record);
        }
    }

    #[test]
    fn test_truncated() {
        let err = EventRecord::decode(&[0u8; 15]).unwrap_err();
        assert_eq!(
            err,
            RecordError::Truncated {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn test_decode_all_rejects_partial_record() {
        let bytes = encode_all(&[EventRecord::default(); 3]);
        assert_eq!(decode_all(&bytes).unwrap().len(), 3);
        assert_eq!(
            decode_all(&bytes[..40]).unwrap_err(),
            RecordError::TrailingBytes(8)
        );
        assert!(decode_all(&[]).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_codec_preserves_fields(ts: u64, dt: u32, val: u16, mask: u16) {
            let record = EventRecord::new(ts, dt, val, mask);
            prop_assert_eq!(EventRecord::decode(&record.encode()).unwrap(), record);
        }
    }
}
