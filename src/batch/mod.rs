//! Batching of captured frames into videos
//!
//! A batch is never stored anywhere: it is the oldest N frame files in the
//! frame directory at the moment an encode starts.

mod accumulator;
mod encoder;
mod quarantine;
mod scanner;

pub use accumulator::BatchAccumulator;
pub use encoder::{BatchEncoder, BatchOutcome};
pub use quarantine::quarantine_frames;
pub use scanner::{RecoveryScanner, ScanDecision};
