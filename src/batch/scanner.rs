//! Recovery scan of the frame directory
//!
//! The frame directory is the only record of progress. Every scan rebuilds
//! the ordered frame list from scratch, so a restart or a lost counter costs
//! nothing beyond one directory listing.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::capture::FrameFile;

/// What the scheduler should do after a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanDecision {
    /// A full batch is waiting; frames are oldest first
    Encode(Vec<FrameFile>),
    /// Not enough frames yet; keep capturing
    Resume { pending: usize, newest: Option<FrameFile> },
}

/// List frame files in `frame_dir`, oldest first
pub async fn scan_frames(frame_dir: &Path) -> io::Result<Vec<FrameFile>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(frame_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(frame) = FrameFile::from_path(entry.path()) {
            frames.push(frame);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Reconciles the in-memory frame count with the frame directory
#[derive(Debug, Clone)]
pub struct RecoveryScanner {
    frame_dir: PathBuf,
    threshold: usize,
}

impl RecoveryScanner {
    pub fn new(frame_dir: PathBuf, threshold: usize) -> Self {
        Self {
            frame_dir,
            threshold: threshold.max(1),
        }
    }

    /// All frames currently on disk, oldest first
    pub async fn list(&self) -> io::Result<Vec<FrameFile>> {
        scan_frames(&self.frame_dir).await
    }

    pub async fn scan(&self) -> io::Result<ScanDecision> {
        let frames = self.list().await?;
        debug!(
            "Scanned {:?}: {} frames (batch size {})",
            self.frame_dir,
            frames.len(),
            self.threshold
        );

        if frames.len() >= self.threshold {
            Ok(ScanDecision::Encode(frames))
        } else {
            Ok(ScanDecision::Resume {
                pending: frames.len(),
                newest: frames.last().cloned(),
            })
        }
    }
}
