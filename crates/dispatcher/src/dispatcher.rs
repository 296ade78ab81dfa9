//! Dispatch Loop

use crate::source::EventSource;
use crate::DispatchError;
use event_record::{decode_all, EventRecord, Flags, RECORD_SIZE, SIZE};
use staging::StagingBuffer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Configuration for the dispatch loop
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sleep between device reads while acquiring (default: 10 ms)
    pub run_poll: Duration,
    /// Sleep between flag checks while stopped (default: 1 s)
    pub idle_poll: Duration,
    /// Sleep while waiting for the reader to release the staging buffer
    pub busy_poll: Duration,
    /// Period of the status line
    pub status_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            run_poll: Duration::from_millis(10),
            idle_poll: Duration::from_secs(1),
            busy_poll: Duration::from_millis(1),
            status_interval: Duration::from_secs(1),
        }
    }
}

/// Record accounting: `received == staged + dropped`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Records read from the device
    pub received: u64,
    /// Records copied into the staging buffer
    pub staged: u64,
    /// Records discarded on staging overflow
    pub dropped: u64,
    /// Overflow events (each one paused acquisition)
    pub overflows: u64,
}

/// Moves records from an [`EventSource`] into the staging buffer
pub struct Dispatcher<S: EventSource> {
    source: S,
    staging: Arc<StagingBuffer>,
    config: DispatcherConfig,
    /// Last run command sent to the device
    running: bool,
    buffer: Vec<u8>,
    stats: DispatchStats,
    started: Instant,
    last_status: Instant,
    window_events: u64,
}

impl<S: EventSource> Dispatcher<S> {
    /// Create a dispatcher; the device is assumed stopped
    pub fn new(source: S, staging: Arc<StagingBuffer>, config: DispatcherConfig) -> Self {
        let now = Instant::now();
        Self {
            source,
            staging,
            config,
            running: false,
            buffer: vec![0u8; SIZE * RECORD_SIZE],
            stats: DispatchStats::default(),
            started: now,
            last_status: now,
            window_events: 0,
        }
    }

    /// Whether the device was last told to run
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Accounting so far
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Give the source back
    pub fn into_source(self) -> S {
        self.source
    }

    /// Loop until `shutdown` turns true (or its sender goes away) or the
    /// device fails. The device is told to stop on the way out.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<DispatchStats, DispatchError> {
        info!("Dispatcher started");
        let mut result = Ok(());

        loop {
            let delay = if self.running {
                self.config.run_poll
            } else {
                self.config.idle_poll
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.step().await {
                error!("Dispatcher aborting: {}", e);
                result = Err(e);
                break;
            }
        }

        info!("Dispatcher stopping acquisition");
        if let Err(e) = self.source.write(b"0") {
            warn!("Failed to stop device on exit: {}", e);
        }
        self.running = false;
        result.map(|_| self.stats)
    }

    /// One loop iteration without the sleep
    pub async fn step(&mut self) -> Result<(), DispatchError> {
        if self.running {
            let n = self.source.read(&mut self.buffer).map_err(DispatchError::Read)?;
            if n % RECORD_SIZE != 0 {
                warn!("Read fraction of event (size = {})", n);
            }
            let whole = n - n % RECORD_SIZE;
            if whole > 0 {
                let records = decode_all(&self.buffer[..whole])?;
                self.stage(&records).await;
            }
        }

        let flags = self.staging.flags();

        if !flags.contains(Flags::RUN) && self.running {
            info!("Stopping acquisition");
            self.source.write(b"0").map_err(DispatchError::Write)?;
            self.running = false;
        }

        if flags.contains(Flags::RUN) && !self.running {
            info!("Starting acquisition");
            self.source.write(b"1").map_err(DispatchError::Write)?;
            self.staging
                .acquire_writer(self.config.busy_poll)
                .await
                .reset();
            self.running = true;
        }

        self.report_status();
        Ok(())
    }

    async fn stage(&mut self, records: &[EventRecord]) {
        let outcome = self
            .staging
            .acquire_writer(self.config.busy_poll)
            .await
            .append(records);

        self.stats.received += records.len() as u64;
        self.stats.staged += outcome.appended as u64;
        self.stats.dropped += outcome.dropped as u64;
        self.window_events += records.len() as u64;

        if outcome.paused {
            self.stats.overflows += 1;
            // Dead time during the pause is not reconstructed
            warn!(
                "Full staging buffer, acquisition paused ({} records dropped)",
                outcome.dropped
            );
        }
        debug!("Staged {} records", outcome.appended);
    }

    fn report_status(&mut self) {
        let elapsed = self.last_status.elapsed();
        if elapsed < self.config.status_interval {
            return;
        }
        let rate = self.window_events as f64 / elapsed.as_secs_f64();
        let status = if self.running { "RUN" } else { "STOP" };
        info!(
            uptime_s = self.started.elapsed().as_secs(),
            status,
            rate_hz = rate.round(),
            "Dispatcher status"
        );
        self.window_events = 0;
        self.last_status = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture::{Conversion, Device, SimulatedAnalyzer};
    use event_record::{encode_all, Resolution};
    use std::collections::VecDeque;
    use std::io;

    /// Source replaying queued records and recording run commands
    #[derive(Default)]
    struct ScriptedSource {
        pending: VecDeque<EventRecord>,
        commands: Vec<u8>,
        fail_reads: bool,
    }

    impl ScriptedSource {
        fn inject(&mut self, n: usize) {
            let base = self.pending.len() as u64;
            for i in 0..n as u64 {
                self.pending
                    .push_back(EventRecord::new(1_000 + base + i, 500, 100 + i as u16, 0));
            }
        }
    }

    impl EventSource for ScriptedSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
            }
            let n = self.pending.len().min(buf.len() / RECORD_SIZE);
            let records: Vec<EventRecord> = self.pending.drain(..n).collect();
            buf[..n * RECORD_SIZE].copy_from_slice(&encode_all(&records));
            Ok(n * RECORD_SIZE)
        }

        fn write(&mut self, cmd: &[u8]) -> io::Result<usize> {
            self.commands.push(cmd[0]);
            Ok(cmd.len())
        }
    }

    fn dispatcher() -> Dispatcher<ScriptedSource> {
        let staging = Arc::new(StagingBuffer::anonymous().unwrap());
        Dispatcher::new(ScriptedSource::default(), staging, DispatcherConfig::default())
    }

    #[tokio::test]
    async fn test_idle_does_not_read() {
        let mut d = dispatcher();
        d.source.inject(3);
        d.step().await.unwrap();
        assert!(!d.is_running());
        assert_eq!(d.source.pending.len(), 3);
        assert!(d.source.commands.is_empty());
    }

    #[tokio::test]
    async fn test_run_edges_write_once() {
        let mut d = dispatcher();
        d.staging.start();
        d.step().await.unwrap();
        d.step().await.unwrap();
        assert!(d.is_running());
        assert_eq!(d.source.commands, b"1");

        d.staging.stop();
        d.step().await.unwrap();
        d.step().await.unwrap();
        assert!(!d.is_running());
        assert_eq!(d.source.commands, b"10");
    }

    #[tokio::test]
    async fn test_records_staged_in_order() {
        let mut d = dispatcher();
        d.staging.start();
        d.step().await.unwrap();

        d.source.inject(3);
        d.step().await.unwrap();
        assert_eq!(d.staging.count(), 3);

        let records = d.staging.try_acquire_reader().unwrap().drain();
        let stamps: Vec<u64> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![1_000, 1_001, 1_002]);
    }

    #[tokio::test]
    async fn test_start_resets_stale_records() {
        let mut d = dispatcher();
        d.staging
            .try_acquire_writer()
            .unwrap()
            .append(&[EventRecord::default(); 4]);
        d.staging.start();
        d.step().await.unwrap();
        assert_eq!(d.staging.count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_conservation() {
        let mut d = dispatcher();
        d.staging.start();
        d.step().await.unwrap();

        d.staging
            .try_acquire_writer()
            .unwrap()
            .append(&vec![EventRecord::default(); SIZE - 2]);
        d.source.inject(5);
        d.step().await.unwrap();

        let stats = d.stats();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.staged, 2);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.received, stats.staged + stats.dropped);
        assert!(d.staging.flags().contains(Flags::PAUSE));

        // RUN was cleared by the overflow: the device is stopped
        assert!(!d.is_running());
        assert_eq!(d.source.commands, b"10");

        // A drain resumes; the next iteration restarts the device
        d.staging.try_acquire_reader().unwrap().drain();
        d.step().await.unwrap();
        assert!(d.is_running());
        assert_eq!(d.source.commands, b"101");
    }

    #[tokio::test]
    async fn test_read_failure_is_an_error() {
        let mut d = dispatcher();
        d.staging.start();
        d.step().await.unwrap();
        d.source.fail_reads = true;
        assert!(matches!(d.step().await, Err(DispatchError::Read(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut d = dispatcher();
        d.staging.start();

        let handle = tokio::spawn(async move {
            let result = d.run(rx).await;
            (result, d)
        });
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        tx.send(true).unwrap();

        let (result, d) = handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(d.source.commands, b"10");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_device_error() {
        let (_tx, rx) = watch::channel(false);
        let mut d = dispatcher();
        d.staging.start();
        d.source.fail_reads = true;

        let result = d.run(rx).await;
        assert!(matches!(result, Err(DispatchError::Read(_))));
        assert_eq!(d.source.commands, b"10");
    }

    #[tokio::test]
    async fn test_with_capture_device() {
        let sim = Arc::new(SimulatedAnalyzer::new(Resolution::default()));
        let device = Device::open(Arc::clone(&sim), Resolution::default()).unwrap();
        let staging = Arc::new(StagingBuffer::anonymous().unwrap());
        let mut d = Dispatcher::new(device, Arc::clone(&staging), DispatcherConfig::default());

        staging.start();
        d.step().await.unwrap();
        assert!(sim.is_running());

        for (i, ch) in [0u16, 1, 400, 8191].iter().enumerate() {
            let t = i as u64 * 10_000;
            assert_eq!(sim.convert_at(t, t + 7_000, *ch), Conversion::Completed);
        }
        d.step().await.unwrap();

        let records = staging.try_acquire_reader().unwrap().drain();
        let values: Vec<u16> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2, 2, 400, 8191]);
        assert!(records.iter().all(|r| r.dead_time == 7_000));
        assert_eq!(d.stats().received, 4);

        staging.stop();
        d.step().await.unwrap();
        assert!(!sim.is_running());
    }
}
