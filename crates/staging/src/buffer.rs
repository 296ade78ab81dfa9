//! Segment Mapping and Header Access

use crate::guard::{ReaderGuard, WriterGuard};
use crate::StagingError;
use event_record::{EventRecord, Flags, RECORD_SIZE, SIZE};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Segment header, shared with any process mapping the segment
#[repr(C)]
struct Header {
    count: AtomicI32,
    flags: AtomicI32,
}

const HEADER_SIZE: usize = 8;

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

/// Exact size of a staging segment in bytes
pub const SEGMENT_SIZE: usize = HEADER_SIZE + SIZE * RECORD_SIZE;

/// Location of a named segment on Linux
pub fn segment_path(name: &str) -> PathBuf {
    Path::new("/dev/shm").join(name.trim_start_matches('/'))
}

/// Mapped staging segment
pub struct StagingBuffer {
    /// Keeps the mapping alive
    #[allow(dead_code)]
    mmap: MmapMut,
    /// Start of the mapping
    base: *mut u8,
    /// Backing file removed on drop (creator only)
    owned_path: Option<PathBuf>,
}

// SAFETY: the mapping lives as long as the struct. Header fields are atomics;
// record slots are only touched by the holder of the writer or reader guard,
// and the guards exclude each other through the flags word.
unsafe impl Send for StagingBuffer {}
unsafe impl Sync for StagingBuffer {}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("count", &self.count())
            .field("flags", &self.flags())
            .field("owned_path", &self.owned_path)
            .finish()
    }
}

impl StagingBuffer {
    /// Create (or replace) the segment at `path` and zero it.
    /// The segment file is removed again when the buffer drops.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StagingError> {
        let path = path.as_ref();
        if path.exists() {
            warn!("Shared segment {} exists, replacing it", path.display());
            std::fs::remove_file(path)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(SEGMENT_SIZE as u64)?;

        // SAFETY: the file was just created with the exact segment size;
        // only cooperating processes map it.
        let mut mmap = unsafe { MmapOptions::new().len(SEGMENT_SIZE).map_mut(&file)? };
        mmap.fill(0);

        info!("Shared segment {} created ({} bytes)", path.display(), SEGMENT_SIZE);
        Ok(Self::from_mmap(mmap, Some(path.to_path_buf())))
    }

    /// Attach to an existing segment of exactly [`SEGMENT_SIZE`] bytes
    pub fn attach(path: impl AsRef<Path>) -> Result<Self, StagingError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let actual = file.metadata()?.len();
        if actual != SEGMENT_SIZE as u64 {
            return Err(StagingError::SizeMismatch {
                expected: SEGMENT_SIZE as u64,
                actual,
            });
        }

        // SAFETY: size checked above; only cooperating processes map it.
        let mmap = unsafe { MmapOptions::new().len(SEGMENT_SIZE).map_mut(&file)? };
        info!("Attached to shared segment {}", path.display());
        Ok(Self::from_mmap(mmap, None))
    }

    /// Private anonymous segment, for in-process use and tests
    pub fn anonymous() -> Result<Self, StagingError> {
        let mmap = MmapMut::map_anon(SEGMENT_SIZE)?;
        Ok(Self::from_mmap(mmap, None))
    }

    fn from_mmap(mut mmap: MmapMut, owned_path: Option<PathBuf>) -> Self {
        let base = mmap.as_mut_ptr();
        Self {
            mmap,
            base,
            owned_path,
        }
    }

    fn header(&self) -> &Header {
        // SAFETY: the mapping is page aligned and at least HEADER_SIZE long
        unsafe { &*(self.base as *const Header) }
    }

    pub(crate) fn records_ptr(&self) -> *mut EventRecord {
        // SAFETY: HEADER_SIZE keeps 8-byte alignment; SIZE slots follow
        unsafe { self.base.add(HEADER_SIZE) as *mut EventRecord }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        SIZE
    }

    /// Staged record count
    pub fn count(&self) -> usize {
        self.header().count.load(Ordering::Acquire).clamp(0, SIZE as i32) as usize
    }

    pub(crate) fn set_count(&self, count: usize) {
        self.header().count.store(count as i32, Ordering::Release);
    }

    /// Current flags word
    pub fn flags(&self) -> Flags {
        Flags::from_bits(self.header().flags.load(Ordering::Acquire))
    }

    pub(crate) fn set_flags(&self, set: Flags) {
        self.header().flags.fetch_or(set.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_flags(&self, clear: Flags) {
        self.header().flags.fetch_and(!clear.bits(), Ordering::AcqRel);
    }

    /// Client `start`: RUN set, PAUSE cleared
    pub fn start(&self) {
        self.set_flags(Flags::RUN);
        self.clear_flags(Flags::PAUSE);
    }

    /// Client `stop`: RUN and PAUSE cleared
    pub fn stop(&self) {
        self.clear_flags(Flags::RUN | Flags::PAUSE);
    }

    /// Reset header to zero (count and every flag)
    pub fn clear(&self) {
        self.header().count.store(0, Ordering::Release);
        self.header().flags.store(0, Ordering::Release);
    }

    fn try_mark(&self, mine: Flags, theirs: Flags) -> bool {
        self.header()
            .flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let flags = Flags::from_bits(bits);
                if flags.intersects(mine | theirs) {
                    None
                } else {
                    Some(flags.with(mine).bits())
                }
            })
            .is_ok()
    }

    /// Take the writer role if neither side is busy
    pub fn try_acquire_writer(&self) -> Option<WriterGuard<'_>> {
        if self.try_mark(Flags::WRITER_BUSY, Flags::READER_BUSY) {
            Some(WriterGuard::new(self))
        } else {
            None
        }
    }

    /// Take the reader role if neither side is busy
    pub fn try_acquire_reader(&self) -> Option<ReaderGuard<'_>> {
        if self.try_mark(Flags::READER_BUSY, Flags::WRITER_BUSY) {
            Some(ReaderGuard::new(self))
        } else {
            None
        }
    }

    /// Spin with `poll` sleeps until the writer role is free
    pub async fn acquire_writer(&self, poll: Duration) -> WriterGuard<'_> {
        loop {
            if let Some(guard) = self.try_acquire_writer() {
                return guard;
            }
            debug!("Staging buffer busy, writer waiting");
            tokio::time::sleep(poll).await;
        }
    }

    /// Spin with `poll` sleeps until the reader role is free
    pub async fn acquire_reader(&self, poll: Duration) -> ReaderGuard<'_> {
        loop {
            if let Some(guard) = self.try_acquire_reader() {
                return guard;
            }
            debug!("Staging buffer busy, reader waiting");
            tokio::time::sleep(poll).await;
        }
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        if let Some(path) = self.owned_path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("Shared segment {} removed", path.display()),
                Err(e) => warn!("Failed to remove shared segment {}: {}", path.display(), e),
            }
        }
    }
}
