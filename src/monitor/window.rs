//! Bounded rolling sample window.
//!
//! Live inference never sees a process's full history: only the most
//! recent [`WINDOW_CAP`] samples are retained, with FIFO eviction, so a
//! long-lived watch has constant memory by construction. Each window is
//! owned exclusively by its guard worker.

use std::collections::VecDeque;

use super::run::TelemetryRun;
use super::sample::Sample;

/// Maximum samples retained for live inference.
pub const WINDOW_CAP: usize = 240;

#[derive(Debug)]
pub struct SampleWindow {
    buf: VecDeque<Sample>,
    cap: usize,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap),
            cap: cap.max(1),
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, sample: Sample) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether enough samples have accrued for a first inference.
    pub fn is_ready(&self, min_samples: usize) -> bool {
        self.buf.len() >= min_samples
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.buf.back()
    }

    /// Synthesize a live run from the current window contents.
    pub fn to_run(&self, run_id: &str) -> TelemetryRun {
        TelemetryRun::live(run_id, self.buf.iter().cloned().collect())
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new()
    }
}
