//! Lock-Free Ring Buffer Implementation

use crate::RingError;
use event_record::{EventRecord, RECORD_SIZE, SIZE};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default buffer capacity (one slot is kept free to tell full from empty)
pub const DEFAULT_CAPACITY: usize = SIZE;

/// Lock-free SPSC ring buffer for event records
pub struct RingBuffer {
    /// Pre-allocated storage
    storage: Box<[UnsafeCell<EventRecord>]>,
    /// Capacity of the buffer
    capacity: usize,
    /// Head position (write pointer)
    head: AtomicUsize,
    /// Tail position (read pointer)
    tail: AtomicUsize,
    /// Total records written (for statistics)
    total_written: AtomicUsize,
    /// Total records handed to the reader
    total_read: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with given capacity
    ///
    /// # Panics
    /// If `capacity < 2`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring buffer needs at least two slots");
        let storage: Vec<UnsafeCell<EventRecord>> = (0..capacity)
            .map(|_| UnsafeCell::new(EventRecord::default()))
            .collect();
        Self {
            storage: storage.into_boxed_slice(),
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            total_written: AtomicUsize::new(0),
            total_read: AtomicUsize::new(0),
        }
    }

    /// Create a buffer with default capacity (10000 slots)
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// True if the producer can push without overwriting unread data
    pub fn has_space(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        (head + 1) % self.capacity != tail
    }

    /// Push a record. Producer side only.
    pub fn push(&self, record: EventRecord) -> Result<(), RingError> {
        let head = self.head.load(Ordering::Relaxed);
        let next_head = (head + 1) % self.capacity;

        if next_head == self.tail.load(Ordering::Acquire) {
            return Err(RingError::Full(self.capacity - 1));
        }

        // SAFETY: single producer; the slot at `head` is outside the
        // published range [tail, head) so the consumer does not touch it
        // until the Release store below.
        unsafe {
            *self.storage[head].get() = record;
        }

        self.head.store(next_head, Ordering::Release);
        self.total_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Copy as many whole records as fit in `buf` and are available,
    /// returning the number of bytes written. Consumer side only.
    ///
    /// Returns 0 when the ring is empty or `buf` cannot hold one record.
    pub fn read_into(&self, buf: &mut [u8]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if head == tail || buf.len() < RECORD_SIZE {
            return 0;
        }

        let available = (head + self.capacity - tail) % self.capacity;
        let transfer = available.min(buf.len() / RECORD_SIZE);

        // Wraparound splits the copy in two contiguous groups
        let first_group = transfer.min(self.capacity - tail);
        self.copy_slots(tail, first_group, &mut buf[..first_group * RECORD_SIZE]);
        let second_group = transfer - first_group;
        if second_group > 0 {
            self.copy_slots(0, second_group, &mut buf[first_group * RECORD_SIZE..]);
        }

        self.tail
            .store((tail + transfer) % self.capacity, Ordering::Release);
        self.total_read.fetch_add(transfer, Ordering::Relaxed);
        transfer * RECORD_SIZE
    }

    fn copy_slots(&self, start: usize, count: usize, out: &mut [u8]) {
        for (i, chunk) in out.chunks_exact_mut(RECORD_SIZE).take(count).enumerate() {
            // SAFETY: slots in [tail, head) were published by the producer's
            // Release store and are not written again until tail moves past them.
            let record = unsafe { *self.storage[start + i].get() };
            record.encode_into(chunk);
        }
    }

    /// Get the number of records currently in the buffer
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            self.capacity - tail + head
        }
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity - 1
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / (self.capacity - 1) as f64
    }

    /// Get total records written (for statistics)
    pub fn total_written(&self) -> usize {
        self.total_written.load(Ordering::Relaxed)
    }

    /// Get total records read (for statistics)
    pub fn total_read(&self) -> usize {
        self.total_read.load(Ordering::Relaxed)
    }

    /// Reset both indices to zero. Only valid while no producer is active.
    pub fn reset(&self) {
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
    }
}

// SAFETY: RingBuffer is SPSC; slot access is ordered by the head/tail
// Acquire/Release pairs, so sharing it between the producer and consumer
// threads is sound as long as each side stays single-threaded.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}
