//! Capture State Machine
//!
//! Pure transition logic: no line access, no clock. The engine feeds it
//! classified edges and the samples taken by the threaded handler.

use event_record::EventRecord;

/// Externally visible FSM state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Idle,
    Dead,
    Event,
    Stalled,
}

/// FSM state together with the data each state carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a conversion to start
    Idle,
    /// Analyzer converting since `t1`
    Dead { t1: u64 },
    /// Value read back, waiting for the end of live time
    Event { t1: u64, value: u16 },
    /// Data ready but the ring is full; acknowledge withheld
    Stalled { t1: u64 },
}

/// Handshake edge, as classified from an interrupt and the line level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    LiveFalling,
    LiveRising,
    ReadyFalling,
    /// A ready interrupt found the line inactive: glitch
    ReadyRising,
}

/// What the caller must do after an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State updated, nothing else to do
    None,
    /// Data ready with ring space: run the threaded read-back
    Convert,
    /// Data ready with no ring space: do not acknowledge
    Stall,
    /// Conversion complete: push this record
    Emit(EventRecord),
    /// Unexpected edge: counted and back to idle
    Error,
}

/// Outcome of a stall recovery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Not stalled
    NotStalled,
    /// Conversion still pending: sample it now
    Sample,
    /// Ready line went inactive meanwhile; back to idle
    Abandon,
}

/// Capture FSM with its error accumulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureState {
    phase: Phase,
    errors: u16,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureState {
    /// Fresh FSM in IDLE with no pending errors
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            errors: 0,
        }
    }

    /// Current phase with its data
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current state
    pub fn state(&self) -> FsmState {
        match self.phase {
            Phase::Idle => FsmState::Idle,
            Phase::Dead { .. } => FsmState::Dead,
            Phase::Event { .. } => FsmState::Event,
            Phase::Stalled { .. } => FsmState::Stalled,
        }
    }

    /// Errors waiting to be attached to the next record
    pub fn pending_errors(&self) -> u16 {
        self.errors
    }

    /// Apply a handshake edge observed at `timestamp_ns`
    pub fn on_edge(&mut self, edge: Edge, timestamp_ns: u64, ring_has_space: bool) -> Transition {
        match (self.phase, edge) {
            (Phase::Idle, Edge::LiveFalling) => {
                self.phase = Phase::Dead { t1: timestamp_ns };
                Transition::None
            }
            (Phase::Dead { t1 }, Edge::ReadyFalling) => {
                if ring_has_space {
                    Transition::Convert
                } else {
                    self.phase = Phase::Stalled { t1 };
                    Transition::Stall
                }
            }
            (Phase::Event { t1, value }, Edge::LiveRising) => {
                let dead_time = u32::try_from(timestamp_ns.saturating_sub(t1)).unwrap_or(u32::MAX);
                let record = EventRecord::new(t1, dead_time, value, self.errors);
                self.errors = 0;
                self.phase = Phase::Idle;
                Transition::Emit(record)
            }
            _ => {
                self.note_error();
                self.phase = Phase::Idle;
                Transition::Error
            }
        }
    }

    /// True when the threaded handler may read the bus
    pub fn expects_sample(&self) -> bool {
        matches!(self.phase, Phase::Dead { .. })
    }

    /// Store the value read back by the threaded handler.
    ///
    /// Outside DEAD the call is counted as an error and the state is kept.
    pub fn on_sample(&mut self, value: u16) -> bool {
        match self.phase {
            Phase::Dead { t1 } => {
                self.phase = Phase::Event { t1, value };
                true
            }
            _ => {
                self.note_error();
                false
            }
        }
    }

    /// Try to leave STALLED once the reader freed ring space
    pub fn resume(&mut self, ready: bool) -> Resume {
        match self.phase {
            Phase::Stalled { t1 } if ready => {
                self.phase = Phase::Dead { t1 };
                Resume::Sample
            }
            Phase::Stalled { .. } => {
                self.phase = Phase::Idle;
                Resume::Abandon
            }
            _ => Resume::NotStalled,
        }
    }

    /// Count an anomaly against the next emitted record
    pub fn note_error(&mut self) {
        self.errors = self.errors.saturating_add(1);
    }
}
