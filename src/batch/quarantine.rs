//! Parking frames from batches that keep failing

use std::io;
use std::path::Path;
use tracing::{info, warn};

use crate::capture::FrameFile;

/// Move `frames` into `quarantine_dir`, returning how many were moved.
///
/// Falls back to copy-and-delete when a rename crosses filesystems.
pub async fn quarantine_frames(frames: &[FrameFile], quarantine_dir: &Path) -> io::Result<usize> {
    tokio::fs::create_dir_all(quarantine_dir).await?;

    let mut moved = 0;
    for frame in frames {
        let target = quarantine_dir.join(frame.file_name());
        if tokio::fs::rename(frame.path(), &target).await.is_err() {
            if let Err(e) = tokio::fs::copy(frame.path(), &target).await {
                warn!("Failed to quarantine {:?}: {}", frame.path(), e);
                continue;
            }
            tokio::fs::remove_file(frame.path()).await?;
        }
        moved += 1;
    }

    info!("Quarantined {} frames into {:?}", moved, quarantine_dir);
    Ok(moved)
}
