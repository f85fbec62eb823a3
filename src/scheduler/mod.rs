//! Capture/encode scheduler - one timer, one operation in flight

mod engine;

pub use engine::{create_scheduler_channels, Scheduler};

use std::time::Duration;
use tokio::time::Instant;

use crate::batch::BatchAccumulator;

/// Commands that can be sent to the scheduler
#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    /// Stop after the in-flight capture or encode resolves
    Shutdown,
}

/// Status updates from the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerStatus {
    /// Started, recovery scan not yet done
    Idle,
    /// Timer running, accumulating frames
    Capturing { count: usize, threshold: usize },
    /// Timer stopped, a batch is being encoded
    Encoding { frames: usize },
    /// A capture or encode failed; the scheduler carries on
    Error(String),
}

/// In-memory scheduling state, rebuilt from disk on every start
#[derive(Debug)]
pub struct SchedulerState {
    batch: BatchAccumulator,
    /// Mutual exclusion between capturing and encoding
    encoding: bool,
    /// Scheduled instant of the last tick that went on to capture
    last_capture_at: Option<Instant>,
}

impl SchedulerState {
    pub fn new(threshold: usize) -> Self {
        Self {
            batch: BatchAccumulator::new(threshold),
            encoding: false,
            last_capture_at: None,
        }
    }

    pub fn captured_count(&self) -> usize {
        self.batch.count()
    }

    pub fn threshold(&self) -> usize {
        self.batch.threshold()
    }

    pub fn is_encoding(&self) -> bool {
        self.encoding
    }

    /// Debounce guard: a full period must separate two captures
    pub fn capture_due(&self, now: Instant, period: Duration) -> bool {
        match self.last_capture_at {
            Some(last) => now.saturating_duration_since(last) >= period,
            None => true,
        }
    }

    pub fn mark_capture(&mut self, at: Instant) {
        self.last_capture_at = Some(at);
    }

    /// Count a successful capture; true when the batch threshold is reached
    pub fn record_capture(&mut self) -> bool {
        self.batch.record_capture()
    }

    pub fn begin_encoding(&mut self) {
        debug_assert!(!self.encoding, "encode started while another is in flight");
        self.encoding = true;
    }

    pub fn finish_encoding(&mut self) {
        self.encoding = false;
    }

    pub fn reset_batch(&mut self) {
        self.batch.reset();
    }

    pub fn resync(&mut self, frames_on_disk: usize) {
        self.batch.resync(frames_on_disk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_requires_full_period() {
        let period = Duration::from_secs(10);
        let mut state = SchedulerState::new(3);
        let t0 = Instant::now();

        assert!(state.capture_due(t0, period));
        state.mark_capture(t0);
        assert!(!state.capture_due(t0 + Duration::from_secs(9), period));
        assert!(state.capture_due(t0 + period, period));
        // A tick scheduled before the last capture never passes
        assert!(!state.capture_due(t0 - Duration::from_secs(1), period));
    }

    #[test]
    fn test_encoding_flag_round_trip() {
        let mut state = SchedulerState::new(3);
        assert!(!state.is_encoding());
        state.begin_encoding();
        assert!(state.is_encoding());
        state.finish_encoding();
        assert!(!state.is_encoding());
    }

    #[test]
    fn test_threshold_and_resync() {
        let mut state = SchedulerState::new(3);
        state.resync(2);
        assert_eq!(state.captured_count(), 2);
        assert!(state.record_capture());
        state.reset_batch();
        assert_eq!(state.captured_count(), 0);
        assert_eq!(state.threshold(), 3);
    }
}
