/// Counts frames captured since the last consumed batch
#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    threshold: usize,
    captured: usize,
}

impl BatchAccumulator {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            captured: 0,
        }
    }

    /// Count one successful capture; true once the batch is full
    pub fn record_capture(&mut self) -> bool {
        self.captured += 1;
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.captured >= self.threshold
    }

    pub fn count(&self) -> usize {
        self.captured
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Batch consumed
    pub fn reset(&mut self) {
        self.captured = 0;
    }

    /// Adopt the frame count found on disk
    pub fn resync(&mut self, on_disk: usize) {
        self.captured = on_disk;
    }
}
