//! Device Interface
//!
//! The open/read/write/release contract exposed to the single reader.

use crate::engine::CaptureEngine;
use crate::fsm::FsmState;
use crate::lines::{HandshakeLines, IrqHandler};
use crate::DeviceError;
use event_record::{Resolution, SIZE};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An opened capture device
pub struct Device<L: HandshakeLines> {
    engine: Arc<CaptureEngine<L>>,
    released: bool,
}

impl<L: HandshakeLines> Device<L> {
    /// Open with the standard ring size
    pub fn open(lines: Arc<L>, resolution: Resolution) -> Result<Self, DeviceError> {
        Self::open_with_capacity(lines, resolution, SIZE)
    }

    /// Claim the lines, arm both interrupts and leave the ADC enabled but
    /// stopped. Fails with [`DeviceError::Busy`] if another reader holds them.
    pub fn open_with_capacity(
        lines: Arc<L>,
        resolution: Resolution,
        capacity: usize,
    ) -> Result<Self, DeviceError> {
        lines.claim()?;

        lines.set_run(false);
        lines.set_enable(true);

        let engine = Arc::new(CaptureEngine::new(Arc::clone(&lines), resolution, capacity));
        let handler: Arc<dyn IrqHandler> = engine.clone();
        if let Err(e) = lines.arm(handler) {
            lines.set_enable(false);
            lines.release();
            return Err(e);
        }

        info!(
            "Capture device opened ({} bit ADC, {} slot ring)",
            resolution.bits(),
            capacity
        );
        Ok(Self {
            engine,
            released: false,
        })
    }

    /// Non-blocking read of whole records into `buf`.
    ///
    /// Returns the number of bytes copied, always a multiple of the record
    /// size; 0 when nothing is available or `buf` is smaller than a record.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let n = self.engine.ring().read_into(buf);
        if n > 0 {
            self.engine.resume_if_stalled();
        }
        n
    }

    /// Run control: `'1'` starts the analyzer, `'0'` stops it.
    /// Other bytes are accepted and ignored.
    pub fn write(&self, cmd: &[u8]) -> usize {
        match cmd.first() {
            Some(b'1') => {
                debug!("RUN line raised");
                self.engine.lines().set_run(true);
            }
            Some(b'0') => {
                debug!("RUN line lowered");
                self.engine.lines().set_run(false);
            }
            Some(other) => warn!("Ignoring run command byte {:#04x}", other),
            None => {}
        }
        cmd.len()
    }

    /// Current capture state
    pub fn state(&self) -> FsmState {
        self.engine.state()
    }

    /// Records waiting in the ring
    pub fn pending(&self) -> usize {
        self.engine.ring().len()
    }

    /// Disarm interrupts, disable the analyzer and give the lines back
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.released {
            return;
        }
        let lines = self.engine.lines();
        lines.set_run(false);
        lines.set_enable(false);
        lines.disarm();
        lines.release();
        self.released = true;
        info!("Capture device released");
    }
}

impl<L: HandshakeLines> Drop for Device<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
