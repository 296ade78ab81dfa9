//! Client-Side Run Accounting
//!
//! The first event of a run only marks the start time (its end,
//! `timestamp + dead_time`). Every later event is histogrammed and advances
//! the real time to its own end.

use event_record::{EventRecord, Resolution};

/// Time unit of the real/live time channels (0.1 s)
const TIME_CHANNEL_NS: u64 = 100_000_000;

/// Spectrum and timing totals over the events received by a client
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    spectrum: Vec<u64>,
    start_mark: Option<u64>,
    real_time_ns: u64,
    dead_time_ns: u64,
    events: u64,
    errors: u64,
    out_of_range: u64,
}

impl RunSummary {
    /// Empty summary with one spectrum bin per ADC channel
    pub fn new(resolution: Resolution) -> Self {
        Self {
            spectrum: vec![0; resolution.channels() as usize],
            start_mark: None,
            real_time_ns: 0,
            dead_time_ns: 0,
            events: 0,
            errors: 0,
            out_of_range: 0,
        }
    }

    /// Fold a batch in
    pub fn update(&mut self, records: &[EventRecord]) {
        for record in records {
            let end = record.timestamp + record.dead_time as u64;
            let Some(start) = self.start_mark else {
                // A zero end is no usable mark; keep looking
                if end != 0 {
                    self.start_mark = Some(end);
                }
                continue;
            };

            self.real_time_ns = end.saturating_sub(start);
            self.dead_time_ns += record.dead_time as u64;
            self.errors += record.error_mask as u64;
            self.events += 1;
            match self.spectrum.get_mut(record.value as usize) {
                Some(bin) => *bin += 1,
                None => self.out_of_range += 1,
            }
        }
    }

    /// Histogrammed events (the start mark excluded)
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Sum of the per-record error counts
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Events whose value does not fit the spectrum
    pub fn out_of_range(&self) -> u64 {
        self.out_of_range
    }

    /// Counts per channel
    pub fn spectrum(&self) -> &[u64] {
        &self.spectrum
    }

    /// Time from the start mark to the end of the latest event, in ns
    pub fn real_time_ns(&self) -> u64 {
        self.real_time_ns
    }

    /// Accumulated dead time in ns
    pub fn dead_time_ns(&self) -> u64 {
        self.dead_time_ns
    }

    /// Real time minus dead time, in ns
    pub fn live_time_ns(&self) -> u64 {
        self.real_time_ns.saturating_sub(self.dead_time_ns)
    }

    /// Fraction of the real time spent dead (0 before any real time)
    pub fn dead_fraction(&self) -> f64 {
        if self.real_time_ns == 0 {
            0.0
        } else {
            (self.dead_time_ns as f64 / self.real_time_ns as f64).min(1.0)
        }
    }

    /// Average accepted rate over the real time in Hz
    pub fn rate_hz(&self) -> f64 {
        if self.real_time_ns == 0 {
            0.0
        } else {
            self.events as f64 * 1e9 / self.real_time_ns as f64
        }
    }

    /// Spectrum with the real and live time written into the reserved
    /// channels 0 and 1, rounded to 0.1 s
    pub fn export(&self) -> Vec<u64> {
        let mut spectrum = self.spectrum.clone();
        let round = |ns: u64| (ns + TIME_CHANNEL_NS / 2) / TIME_CHANNEL_NS;
        spectrum[0] = round(self.real_time_ns);
        spectrum[1] = round(self.live_time_ns());
        spectrum
    }
}
