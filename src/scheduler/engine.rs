//! Scheduler engine
//!
//! Drives frame capture from a single interval timer and hands full batches
//! to the encoder. The timer is stopped for the whole of an encode and only
//! restarted once the encode has resolved, so at most one media tool
//! invocation is ever in flight.
//!
//! After every encode the frame directory is scanned again: a backlog of
//! several batches drains back to back, anything short of a batch goes back
//! to capturing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::batch::{
    quarantine_frames, BatchEncoder, BatchOutcome, RecoveryScanner, ScanDecision,
};
use crate::capture::{FrameCapturer, FrameFile};
use crate::config::Config;
use crate::media::MediaTool;

use super::{SchedulerCommand, SchedulerState, SchedulerStatus};

/// What to do once an encode has resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Scan the frame directory again (another batch may be waiting)
    Rescan,
    /// Go straight back to capturing
    Resume,
}

/// Consecutive failures of one batch, keyed by its newest frame
#[derive(Debug)]
struct BatchRetry {
    newest: String,
    attempts: u32,
}

/// Owns the capture timer and the capture/encode state machine
pub struct Scheduler<M> {
    /// Capture period
    period: Duration,
    /// Failed attempts before a batch is quarantined (0 = never)
    max_batch_attempts: u32,
    quarantine_dir: PathBuf,
    state: SchedulerState,
    /// The only capture timer; None while stopped
    timer: Option<Interval>,
    capturer: FrameCapturer<M>,
    scanner: RecoveryScanner,
    encoder: BatchEncoder<M>,
    retry: Option<BatchRetry>,
    /// Set when a shutdown arrives between backlog encodes
    shutdown_requested: bool,
    cmd_rx: mpsc::Receiver<SchedulerCommand>,
    status_tx: broadcast::Sender<SchedulerStatus>,
}

impl<M: MediaTool> Scheduler<M> {
    pub fn new(
        config: &Config,
        tool: Arc<M>,
        cmd_rx: mpsc::Receiver<SchedulerCommand>,
        status_tx: broadcast::Sender<SchedulerStatus>,
    ) -> Self {
        let threshold = config.batch_size();
        let frame_dir = config.storage.frame_directory.clone();

        Self {
            period: config.capture_interval(),
            max_batch_attempts: config.schedule.max_batch_attempts,
            quarantine_dir: config.storage.quarantine_directory.clone(),
            state: SchedulerState::new(threshold),
            timer: None,
            capturer: FrameCapturer::new(tool.clone(), frame_dir.clone()),
            scanner: RecoveryScanner::new(frame_dir.clone(), threshold),
            encoder: BatchEncoder::new(
                tool,
                frame_dir,
                config.storage.video_directory.clone(),
                threshold,
            ),
            retry: None,
            shutdown_requested: false,
            cmd_rx,
            status_tx,
        }
    }

    /// Run until shutdown. Operational errors are logged, never returned.
    pub async fn run(&mut self) {
        info!(
            "Scheduler starting: one frame every {:?}, {} frames per video",
            self.period,
            self.state.threshold()
        );
        let _ = self.status_tx.send(SchedulerStatus::Idle);

        // Drain any backlog before the first tick
        self.recover().await;

        while !self.shutdown_requested {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Shutdown) => {
                            info!("Shutdown command received");
                            break;
                        }
                        None => {
                            info!("Command channel closed");
                            break;
                        }
                    }
                }

                scheduled = next_tick(&mut self.timer) => {
                    self.on_tick(scheduled).await;
                }
            }
        }

        self.stop();
        info!("Scheduler stopped");
    }

    /// Start the capture timer unless one is already running.
    ///
    /// The first tick lands one full period from now.
    fn start(&mut self) {
        debug_assert!(!self.state.is_encoding());
        if self.timer.is_some() {
            debug!("Capture timer already running");
            return;
        }

        let mut timer = tokio::time::interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        debug!("Capture timer started");
        self.publish_progress();
    }

    fn stop(&mut self) {
        if self.timer.take().is_some() {
            debug!("Capture timer stopped");
        }
    }

    async fn on_tick(&mut self, scheduled: Instant) {
        if self.state.is_encoding() {
            debug!("Tick ignored: encode in progress");
            return;
        }
        if !self.state.capture_due(scheduled, self.period) {
            debug!("Tick ignored: previous capture less than {:?} ago", self.period);
            return;
        }

        self.state.mark_capture(scheduled);
        match self.capturer.capture().await {
            Ok(path) => {
                let full = self.state.record_capture();
                info!(
                    "Captured frame {}/{} ({})",
                    self.state.captured_count(),
                    self.state.threshold(),
                    path.display()
                );
                self.publish_progress();

                if full {
                    self.hand_off().await;
                }
            }
            Err(e) => {
                warn!("Frame capture failed, retrying next tick: {}", e);
                let _ = self
                    .status_tx
                    .send(SchedulerStatus::Error(format!("capture failed: {}", e)));
            }
        }
    }

    /// Threshold reached: stop capturing and encode the oldest batch
    async fn hand_off(&mut self) {
        self.stop();

        let frames = match self.scanner.list().await {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to list frames for encoding: {}", e);
                self.start();
                return;
            }
        };

        match self.encode(&frames).await {
            Resolution::Rescan if self.shutdown_pending() => {}
            Resolution::Rescan => self.recover().await,
            Resolution::Resume => self.start(),
        }
    }

    /// Reconcile with the frame directory, encoding every full batch found,
    /// then resume capturing.
    async fn recover(&mut self) {
        loop {
            let decision = match self.scanner.scan().await {
                Ok(decision) => decision,
                Err(e) => {
                    error!("Recovery scan failed: {}", e);
                    let _ = self
                        .status_tx
                        .send(SchedulerStatus::Error(format!("scan failed: {}", e)));
                    self.start();
                    return;
                }
            };

            match decision {
                ScanDecision::Resume { pending, newest } => {
                    self.capturer.observe(newest.as_ref());
                    self.state.resync(pending);
                    info!(
                        "{}/{} frames on disk, capturing",
                        pending,
                        self.state.threshold()
                    );
                    self.start();
                    return;
                }
                ScanDecision::Encode(frames) => {
                    self.capturer.observe(frames.last());
                    self.state.resync(frames.len());
                    info!(
                        "{} frames on disk, encoding before capturing",
                        frames.len()
                    );
                    if self.encode(&frames).await == Resolution::Resume {
                        self.start();
                        return;
                    }
                    if self.shutdown_pending() {
                        return;
                    }
                }
            }
        }
    }

    /// Run one encode with the timer stopped and the encoding flag held
    async fn encode(&mut self, frames: &[FrameFile]) -> Resolution {
        self.stop();
        self.state.begin_encoding();
        let _ = self.status_tx.send(SchedulerStatus::Encoding {
            frames: frames.len().min(self.state.threshold()),
        });

        let outcome = self.encoder.encode(frames).await;
        self.state.finish_encoding();

        match outcome {
            BatchOutcome::Encoded { video, leftover } => {
                info!("Wrote video {:?}", video);
                self.retry = None;
                if leftover.is_empty() {
                    self.state.reset_batch();
                    return Resolution::Rescan;
                }

                // Re-scanning now would encode the same frames straight away
                let names: Vec<&str> = leftover.iter().map(FrameFile::file_name).collect();
                error!(
                    "{} frames already in {:?} could not be deleted, remove them by hand: {}",
                    leftover.len(),
                    video,
                    names.join(", ")
                );
                let on_disk = match self.scanner.list().await {
                    Ok(frames) => frames.len(),
                    Err(e) => {
                        warn!("Failed to recount frames: {}", e);
                        leftover.len()
                    }
                };
                self.state.resync(on_disk);
                Resolution::Resume
            }
            BatchOutcome::Shortfall { available } => {
                info!(
                    "Encode skipped: {} of {} frames available",
                    available,
                    self.state.threshold()
                );
                Resolution::Rescan
            }
            BatchOutcome::Failed { batch, error } => {
                error!("Encode failed, frames kept for retry: {}", error);
                let _ = self
                    .status_tx
                    .send(SchedulerStatus::Error(format!("encode failed: {}", error)));

                if self.retry_exhausted(&batch) {
                    match quarantine_frames(&batch, &self.quarantine_dir).await {
                        Ok(moved) if moved > 0 => return Resolution::Rescan,
                        Ok(_) => warn!("No frames could be quarantined"),
                        Err(e) => error!("Quarantine failed: {}", e),
                    }
                }
                Resolution::Resume
            }
        }
    }

    /// Count a failure of `batch`; true once it should be quarantined
    fn retry_exhausted(&mut self, batch: &[FrameFile]) -> bool {
        let Some(newest) = batch.last() else {
            return false;
        };
        let key = newest.file_name().to_string();

        let attempts = match self.retry.take() {
            Some(retry) if retry.newest == key => retry.attempts + 1,
            _ => 1,
        };
        warn!("Batch ending at {} has failed {} time(s)", key, attempts);

        if self.max_batch_attempts == 0 || attempts < self.max_batch_attempts {
            self.retry = Some(BatchRetry {
                newest: key,
                attempts,
            });
            return false;
        }
        warn!(
            "Batch ending at {} reached {} attempts, quarantining",
            key, self.max_batch_attempts
        );
        true
    }

    /// Check for a shutdown queued while an encode was running
    fn shutdown_pending(&mut self) -> bool {
        if self.shutdown_requested {
            return true;
        }
        match self.cmd_rx.try_recv() {
            Ok(SchedulerCommand::Shutdown) => {
                info!("Shutdown command received, leaving remaining backlog on disk");
                self.shutdown_requested = true;
            }
            Err(TryRecvError::Disconnected) => {
                info!("Command channel closed, leaving remaining backlog on disk");
                self.shutdown_requested = true;
            }
            Err(TryRecvError::Empty) => {}
        }
        self.shutdown_requested
    }

    fn publish_progress(&self) {
        let _ = self.status_tx.send(SchedulerStatus::Capturing {
            count: self.state.captured_count(),
            threshold: self.state.threshold(),
        });
    }
}

/// Next tick of the capture timer; never resolves while it is stopped
async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer.as_mut() {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

/// Create command and status channels for the scheduler
pub fn create_scheduler_channels() -> (
    mpsc::Sender<SchedulerCommand>,
    mpsc::Receiver<SchedulerCommand>,
    broadcast::Sender<SchedulerStatus>,
    broadcast::Receiver<SchedulerStatus>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (status_tx, status_rx) = broadcast::channel(64);
    (cmd_tx, cmd_rx, status_tx, status_rx)
}
