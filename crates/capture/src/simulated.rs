//! Simulated Analyzer
//!
//! Software stand-in for the ADC wiring. It drives complete conversions
//! through the handshake (live falls, ready falls, wait for acknowledge,
//! live rises) and honors the acknowledge backpressure: while a conversion
//! is unacknowledged no new one starts.

use crate::lines::{HandshakeLines, Irq, IrqHandler, IrqReturn, Level, Line};
use crate::{now_ns, DeviceError};
use event_record::Resolution;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of one simulated pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Acknowledged and closed by the live rising edge
    Completed,
    /// Data ready but not acknowledged; lines left active
    Stalled,
    /// A previous conversion still waits for its acknowledge
    Blocked,
    /// RUN or ENABLE low, or no interrupt handler armed
    Skipped,
}

/// Simulated ADC and handshake wiring
pub struct SimulatedAnalyzer {
    resolution: Resolution,
    claimed: AtomicBool,
    run: AtomicBool,
    enable: AtomicBool,
    /// true = line high (inactive)
    live: AtomicBool,
    ready: AtomicBool,
    bus: AtomicU16,
    acked: AtomicBool,
    stalled: AtomicBool,
    ack_count: AtomicUsize,
    handler: Mutex<Option<Arc<dyn IrqHandler>>>,
}

impl SimulatedAnalyzer {
    /// Create an idle analyzer with both lines inactive
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            claimed: AtomicBool::new(false),
            run: AtomicBool::new(false),
            enable: AtomicBool::new(false),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(true),
            bus: AtomicU16::new(0),
            acked: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            ack_count: AtomicUsize::new(0),
            handler: Mutex::new(None),
        }
    }

    /// RUN output as last driven
    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }

    /// ENABLE output as last driven
    pub fn is_enabled(&self) -> bool {
        self.enable.load(Ordering::Acquire)
    }

    /// Acknowledge pulses seen so far
    pub fn ack_count(&self) -> usize {
        self.ack_count.load(Ordering::Relaxed)
    }

    /// Put a raw pattern on the data bus
    pub fn drive_bus(&self, raw: u16) {
        self.bus.store(raw, Ordering::Release);
    }

    /// Force a line level without raising an interrupt
    pub fn set_level(&self, line: Line, level: Level) {
        self.line(line).store(level == Level::High, Ordering::Release);
    }

    /// Force a line level and raise its interrupt at `timestamp_ns`
    pub fn inject_at(&self, line: Line, level: Level, timestamp_ns: u64) -> Option<IrqReturn> {
        self.set_level(line, level);
        self.fire(line, timestamp_ns)
    }

    /// One conversion of `channel` using the wall clock
    pub fn convert(&self, channel: u16, conversion: Duration) -> Conversion {
        let start = now_ns();
        self.convert_at(start, start + conversion.as_nanos() as u64, channel)
    }

    /// One conversion of `channel`, live time from `start_ns` to `end_ns`
    pub fn convert_at(&self, start_ns: u64, end_ns: u64, channel: u16) -> Conversion {
        self.complete_stalled_at(start_ns);
        if self.stalled.load(Ordering::Acquire) {
            return Conversion::Blocked;
        }
        if !self.is_running() || !self.is_enabled() || self.handler.lock().is_none() {
            return Conversion::Skipped;
        }

        self.set_level(Line::Live, Level::Low);
        self.fire(Line::Live, start_ns);

        // Bus lines are active low
        self.drive_bus(!(channel & self.resolution.mask()));
        self.acked.store(false, Ordering::Release);
        self.set_level(Line::Ready, Level::Low);
        self.fire(Line::Ready, start_ns);

        if self.acked.load(Ordering::Acquire) {
            self.finish(end_ns);
            Conversion::Completed
        } else {
            self.stalled.store(true, Ordering::Release);
            Conversion::Stalled
        }
    }

    /// Close a stalled conversion once it has been acknowledged.
    /// Returns true if one was closed.
    pub fn complete_stalled_at(&self, end_ns: u64) -> bool {
        if self.stalled.load(Ordering::Acquire) && self.acked.load(Ordering::Acquire) {
            self.stalled.store(false, Ordering::Release);
            self.finish(end_ns);
            true
        } else {
            false
        }
    }

    /// Generate pulses at roughly `rate_hz` until `stop` is set.
    /// The thread returns the number of completed conversions.
    pub fn spawn_generator(
        self: &Arc<Self>,
        rate_hz: f64,
        conversion: Duration,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<u64> {
        let sim = Arc::clone(self);
        let period = Duration::from_secs_f64(1.0 / rate_hz.max(0.001));
        info!("Simulated analyzer generating ~{} Hz", rate_hz);

        std::thread::spawn(move || {
            let mut completed = 0u64;
            let mut n = 0u64;
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(period);
                let channel = sim.pseudo_channel(n);
                n += 1;
                if sim.convert(channel, conversion) == Conversion::Completed {
                    completed += 1;
                }
            }
            debug!("Simulated analyzer stopped after {} conversions", completed);
            completed
        })
    }

    /// Deterministic, peaked channel distribution
    fn pseudo_channel(&self, n: u64) -> u16 {
        let mut hasher = DefaultHasher::new();
        n.hash(&mut hasher);
        let hash = hasher.finish();

        // Sum of four 16-bit draws peaks at mid-range
        let sum: u64 = (0..4).map(|i| (hash >> (16 * i)) & 0xffff).sum();
        let mask = self.resolution.mask() as u64;
        (sum * mask / (4 * 0xffff)) as u16
    }

    fn finish(&self, end_ns: u64) {
        self.set_level(Line::Ready, Level::High);
        self.set_level(Line::Live, Level::High);
        self.fire(Line::Live, end_ns);
    }

    fn line(&self, line: Line) -> &AtomicBool {
        match line {
            Line::Live => &self.live,
            Line::Ready => &self.ready,
        }
    }

    fn fire(&self, irq: Irq, timestamp_ns: u64) -> Option<IrqReturn> {
        let handler = self.handler.lock().clone()?;
        let ret = handler.top_half(irq, timestamp_ns);
        if ret == IrqReturn::WakeThread {
            handler.threaded(irq);
        }
        Some(ret)
    }
}

impl HandshakeLines for SimulatedAnalyzer {
    fn claim(&self) -> Result<(), DeviceError> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| DeviceError::Busy)
    }

    fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    fn level(&self, line: Line) -> Level {
        if self.line(line).load(Ordering::Acquire) {
            Level::High
        } else {
            Level::Low
        }
    }

    fn sample_bus(&self) -> u16 {
        self.bus.load(Ordering::Acquire)
    }

    fn pulse_ack(&self) {
        self.acked.store(true, Ordering::Release);
        self.ack_count.fetch_add(1, Ordering::Relaxed);
    }

    fn set_run(&self, on: bool) {
        self.run.store(on, Ordering::Release);
    }

    fn set_enable(&self, on: bool) {
        self.enable.store(on, Ordering::Release);
    }

    fn arm(&self, handler: Arc<dyn IrqHandler>) -> Result<(), DeviceError> {
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    fn disarm(&self) {
        self.handler.lock().take();
    }
}
