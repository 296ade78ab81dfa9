//! Writer and Reader Roles

use crate::buffer::StagingBuffer;
use event_record::{encode_all, EventRecord, Flags};

/// Result of one append
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Records copied into the segment
    pub appended: usize,
    /// Records discarded because the segment filled up
    pub dropped: usize,
    /// The segment reached capacity and acquisition was paused
    pub paused: bool,
}

/// Exclusive writer role; clears `WRITER_BUSY` on drop
pub struct WriterGuard<'a> {
    staging: &'a StagingBuffer,
}

impl<'a> WriterGuard<'a> {
    pub(crate) fn new(staging: &'a StagingBuffer) -> Self {
        Self { staging }
    }

    /// Append a batch after the staged records.
    ///
    /// If the batch reaches capacity only what fits is copied, RUN is
    /// cleared, PAUSE is set and the rest is dropped.
    pub fn append(&mut self, records: &[EventRecord]) -> AppendOutcome {
        if records.is_empty() {
            return AppendOutcome::default();
        }

        let count = self.staging.count();
        let capacity = self.staging.capacity();
        let mut outcome = AppendOutcome {
            appended: records.len(),
            ..Default::default()
        };

        if count + records.len() >= capacity {
            self.staging.clear_flags(Flags::RUN);
            self.staging.set_flags(Flags::PAUSE);
            outcome.appended = capacity - count;
            outcome.dropped = records.len() - outcome.appended;
            outcome.paused = true;
        }

        let slots = self.staging.records_ptr();
        for (i, record) in records[..outcome.appended].iter().enumerate() {
            // SAFETY: count + i < capacity, and the writer role excludes the reader
            unsafe { slots.add(count + i).write(*record) };
        }
        self.staging.set_count(count + outcome.appended);
        outcome
    }

    /// Forget staged records (new run)
    pub fn reset(&mut self) {
        self.staging.set_count(0);
    }

    /// Records currently staged
    pub fn count(&self) -> usize {
        self.staging.count()
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.staging.clear_flags(Flags::WRITER_BUSY);
    }
}

/// Exclusive reader role; clears `READER_BUSY` on drop
pub struct ReaderGuard<'a> {
    staging: &'a StagingBuffer,
}

impl<'a> ReaderGuard<'a> {
    pub(crate) fn new(staging: &'a StagingBuffer) -> Self {
        Self { staging }
    }

    /// Copy out every staged record and empty the segment.
    /// A PAUSE left by an overflow is turned back into RUN.
    pub fn drain(&mut self) -> Vec<EventRecord> {
        let count = self.staging.count();
        let slots = self.staging.records_ptr();
        let records = (0..count)
            // SAFETY: slots below count were written by the writer before
            // it released its role; the reader role excludes it now.
            .map(|i| unsafe { slots.add(i).read() })
            .collect();
        self.staging.set_count(0);

        if self.staging.flags().contains(Flags::PAUSE) {
            self.staging.set_flags(Flags::RUN);
            self.staging.clear_flags(Flags::PAUSE);
        }
        records
    }

    /// [`ReaderGuard::drain`] encoded in the 16-byte wire layout
    pub fn drain_bytes(&mut self) -> Vec<u8> {
        encode_all(&self.drain())
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.staging.clear_flags(Flags::READER_BUSY);
    }
}
