//! Interrupt Handlers
//!
//! Binds the capture FSM to the analyzer lines and the device ring. The FSM
//! state lives behind a short mutex standing in for the interrupt-disable
//! lock: every holder does bounded work and never sleeps.

use crate::fsm::{CaptureState, Edge, FsmState, Resume, Transition};
use crate::lines::{HandshakeLines, Irq, IrqHandler, IrqReturn, Level, Line};
use event_record::{Resolution, MIN_CHANNEL};
use parking_lot::Mutex;
use ring_buffer::RingBuffer;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Capture path for one analyzer
pub struct CaptureEngine<L: HandshakeLines> {
    lines: Arc<L>,
    ring: RingBuffer,
    state: Mutex<CaptureState>,
    resolution: Resolution,
}

impl<L: HandshakeLines> CaptureEngine<L> {
    /// Create an engine with an empty ring of `capacity` slots
    pub fn new(lines: Arc<L>, resolution: Resolution, capacity: usize) -> Self {
        Self {
            lines,
            ring: RingBuffer::new(capacity),
            state: Mutex::new(CaptureState::new()),
            resolution,
        }
    }

    /// Ring shared with the reader
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Lines this engine drives
    pub fn lines(&self) -> &Arc<L> {
        &self.lines
    }

    /// Current FSM state
    pub fn state(&self) -> FsmState {
        self.state.lock().state()
    }

    /// Errors not yet attached to a record
    pub fn pending_errors(&self) -> u16 {
        self.state.lock().pending_errors()
    }

    /// Put the FSM back to IDLE with a clean error accumulator
    pub fn reset(&self) {
        *self.state.lock() = CaptureState::new();
        self.ring.reset();
    }

    /// Read the bus, complement it, clamp reserved codes, acknowledge.
    fn read_back(&self) -> u16 {
        let raw = self.lines.sample_bus();
        let mut value = !raw & self.resolution.mask();
        if value < MIN_CHANNEL {
            value = MIN_CHANNEL;
        }
        self.lines.pulse_ack();
        value
    }

    /// Called by the reader after freeing ring space
    pub fn resume_if_stalled(&self) {
        let mut state = self.state.lock();
        if state.state() != FsmState::Stalled {
            return;
        }
        let ready = self.lines.level(Line::Ready) == Level::Low;
        match state.resume(ready) {
            Resume::Sample => {
                let value = self.read_back();
                state.on_sample(value);
                debug!("Stalled conversion resumed (value = {})", value);
            }
            Resume::Abandon => {
                error!("Ready line inactive while stalled, dropping pending conversion");
            }
            Resume::NotStalled => {}
        }
    }

    fn classify(&self, irq: Irq) -> Edge {
        match (irq, self.lines.level(irq)) {
            (Line::Live, Level::Low) => Edge::LiveFalling,
            (Line::Live, Level::High) => Edge::LiveRising,
            (Line::Ready, Level::Low) => Edge::ReadyFalling,
            (Line::Ready, Level::High) => Edge::ReadyRising,
        }
    }
}

impl<L: HandshakeLines> IrqHandler for CaptureEngine<L> {
    fn top_half(&self, irq: Irq, timestamp_ns: u64) -> IrqReturn {
        let mut state = self.state.lock();
        let edge = self.classify(irq);
        let from = state.state();

        match state.on_edge(edge, timestamp_ns, self.ring.has_space()) {
            Transition::Convert => IrqReturn::WakeThread,
            Transition::Emit(record) => {
                // Space was checked when ready fell and only the reader ran since
                if let Err(e) = self.ring.push(record) {
                    error!("Record lost after read-back: {}", e);
                }
                IrqReturn::Handled
            }
            Transition::Stall => {
                debug!("Ring full, withholding acknowledge");
                IrqReturn::Handled
            }
            Transition::Error => {
                warn!(
                    "Bad {:?} transition (state = {:?}, live = {:?}, ready = {:?})",
                    edge,
                    from,
                    self.lines.level(Line::Live),
                    self.lines.level(Line::Ready)
                );
                IrqReturn::Handled
            }
            Transition::None => IrqReturn::Handled,
        }
    }

    fn threaded(&self, irq: Irq) {
        let mut state = self.state.lock();
        if irq != Line::Ready {
            warn!("Threaded handler invoked for {:?} interrupt", irq);
            state.note_error();
            return;
        }
        if !state.expects_sample() {
            warn!("Threaded read-back outside DEAD (state = {:?})", state.state());
            state.note_error();
            return;
        }
        let value = self.read_back();
        state.on_sample(value);
    }
}
