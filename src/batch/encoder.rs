//! Batch encoding
//!
//! Turns the oldest N frames into one video named after the newest of them,
//! then deletes those N frames. Nothing is deleted unless the video was
//! written and moved into place.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::{video_file_stem, FrameFile, VIDEO_EXTENSION};
use crate::media::{MediaError, MediaTool, VIDEO_FRAME_RATE};

/// Concat list written next to the frames for the duration of one encode
pub const MANIFEST_FILE_NAME: &str = "manifest.txt";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot parse capture timestamp from frame {0:?}")]
    UnparseableTimestamp(String),

    #[error("failed to write manifest {path:?}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Tool(#[from] MediaError),

    #[error("failed to move video into place at {path:?}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How one encode attempt resolved
#[derive(Debug)]
pub enum BatchOutcome {
    /// Video written; `leftover` lists batch frames that could not be deleted
    Encoded {
        video: PathBuf,
        leftover: Vec<FrameFile>,
    },
    /// Fewer than N candidates; nothing touched
    Shortfall { available: usize },
    /// Batch left on disk for a later attempt
    Failed {
        batch: Vec<FrameFile>,
        error: EncodeError,
    },
}

pub struct BatchEncoder<M> {
    tool: Arc<M>,
    frame_dir: PathBuf,
    video_dir: PathBuf,
    threshold: usize,
}

impl<M: MediaTool> BatchEncoder<M> {
    pub fn new(tool: Arc<M>, frame_dir: PathBuf, video_dir: PathBuf, threshold: usize) -> Self {
        Self {
            tool,
            frame_dir,
            video_dir,
            threshold: threshold.max(1),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.frame_dir.join(MANIFEST_FILE_NAME)
    }

    /// Encode the oldest N of `candidates` (which must be sorted oldest first)
    pub async fn encode(&self, candidates: &[FrameFile]) -> BatchOutcome {
        if candidates.len() < self.threshold {
            return BatchOutcome::Shortfall {
                available: candidates.len(),
            };
        }

        let batch = candidates[..self.threshold].to_vec();
        match self.encode_batch(&batch).await {
            Ok(video) => {
                let leftover = delete_frames(&batch).await;
                BatchOutcome::Encoded { video, leftover }
            }
            Err(error) => BatchOutcome::Failed { batch, error },
        }
    }

    async fn encode_batch(&self, batch: &[FrameFile]) -> Result<PathBuf, EncodeError> {
        let newest = &batch[batch.len() - 1];
        let captured_at = newest
            .captured_at
            .ok_or_else(|| EncodeError::UnparseableTimestamp(newest.file_name().to_string()))?;

        let video = unique_video_path(&self.video_dir, &video_file_stem(captured_at)).await;
        let partial = partial_path(&video);
        let manifest = self.manifest_path();

        tokio::fs::write(&manifest, render_manifest(batch))
            .await
            .map_err(|source| EncodeError::Manifest {
                path: manifest.clone(),
                source,
            })?;

        info!(
            "Encoding {} frames ({} .. {}) into {:?}",
            batch.len(),
            batch[0].file_name(),
            newest.file_name(),
            video
        );
        let result = self.tool.encode_batch(&manifest, &partial).await;

        // Manifest goes on every path, success or not
        if let Err(e) = tokio::fs::remove_file(&manifest).await {
            warn!("Failed to remove manifest {:?}: {}", manifest, e);
        }

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        tokio::fs::rename(&partial, &video)
            .await
            .map_err(|source| EncodeError::Publish {
                path: video.clone(),
                source,
            })?;
        Ok(video)
    }
}

/// Concat demuxer script listing `batch` in order.
///
/// Entries are bare file names resolved against the manifest's own
/// directory. The last file is repeated so its duration is honoured.
pub fn render_manifest(batch: &[FrameFile]) -> String {
    let duration = 1.0 / VIDEO_FRAME_RATE as f64;
    let mut out = String::from("ffconcat version 1.0\n");
    for frame in batch {
        out.push_str(&format!("file '{}'\n", escape_concat(frame.file_name())));
        out.push_str(&format!("duration {:.3}\n", duration));
    }
    if let Some(last) = batch.last() {
        out.push_str(&format!("file '{}'\n", escape_concat(last.file_name())));
    }
    out
}

fn escape_concat(name: &str) -> String {
    name.replace('\'', "'\\''")
}

/// `<stem>.mp4`, or `<stem>-1.mp4`, `<stem>-2.mp4`, ... if taken
async fn unique_video_path(video_dir: &Path, stem: &str) -> PathBuf {
    let mut candidate = video_dir.join(format!("{}.{}", stem, VIDEO_EXTENSION));
    let mut suffix = 0u32;
    while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        suffix += 1;
        candidate = video_dir.join(format!("{}-{}.{}", stem, suffix, VIDEO_EXTENSION));
    }
    candidate
}

fn partial_path(video: &Path) -> PathBuf {
    let name = video
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    video.with_file_name(format!(".{}.part", name))
}

/// Remove consumed frames, returning the ones still on disk
async fn delete_frames(batch: &[FrameFile]) -> Vec<FrameFile> {
    let mut leftover = Vec::new();
    for frame in batch {
        match tokio::fs::remove_file(frame.path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Frame {:?} already gone", frame.path());
            }
            Err(e) => {
                warn!("Failed to delete frame {:?}: {}", frame.path(), e);
                leftover.push(frame.clone());
            }
        }
    }
    leftover
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::scanner::scan_frames;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTool {
        fail: AtomicBool,
        /// Frame swapped for a non-empty directory during the encode
        undeletable: Mutex<Option<String>>,
        manifests: Mutex<Vec<String>>,
    }

    impl MediaTool for RecordingTool {
        async fn grab_frame(&self, _dest: &Path) -> Result<(), MediaError> {
            unreachable!("encoder never grabs")
        }

        async fn encode_batch(&self, manifest: &Path, output: &Path) -> Result<(), MediaError> {
            let listing = std::fs::read_to_string(manifest).unwrap();
            self.manifests.lock().unwrap().push(listing);
            if let Some(name) = self.undeletable.lock().unwrap().take() {
                let frame = manifest.parent().unwrap().join(name);
                std::fs::remove_file(&frame).unwrap();
                std::fs::create_dir(&frame).unwrap();
                std::fs::write(frame.join("pinned"), b"x").unwrap();
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(MediaError::Exit {
                    code: Some(1),
                    stderr: "Invalid data found when processing input".to_string(),
                });
            }
            std::fs::write(output, b"video").unwrap();
            Ok(())
        }
    }

    struct Fixture {
        frames: tempfile::TempDir,
        videos: tempfile::TempDir,
        tool: Arc<RecordingTool>,
        encoder: BatchEncoder<RecordingTool>,
    }

    fn fixture(threshold: usize, names: &[&str]) -> Fixture {
        let frames = tempfile::tempdir().unwrap();
        let videos = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(frames.path().join(name), b"jpeg").unwrap();
        }
        let tool = Arc::new(RecordingTool::default());
        let encoder = BatchEncoder::new(
            tool.clone(),
            frames.path().to_path_buf(),
            videos.path().to_path_buf(),
            threshold,
        );
        Fixture {
            frames,
            videos,
            tool,
            encoder,
        }
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    const FIVE: [&str; 5] = [
        "2024-05-01T12-00-00-000Z.jpg",
        "2024-05-01T12-00-10-000Z.jpg",
        "2024-05-01T12-00-20-000Z.jpg",
        "2024-05-01T12-00-30-000Z.jpg",
        "2024-05-01T12-00-40-000Z.jpg",
    ];

    #[tokio::test]
    async fn test_encodes_oldest_n_and_leaves_surplus() {
        let fx = fixture(3, &FIVE);
        std::fs::write(fx.frames.path().join("notes.txt"), b"keep").unwrap();
        let candidates = scan_frames(fx.frames.path()).await.unwrap();

        match fx.encoder.encode(&candidates).await {
            BatchOutcome::Encoded { video, leftover } => {
                assert!(leftover.is_empty());
                assert_eq!(video, fx.videos.path().join("2024-05-01-12-00.mp4"));
                assert!(video.exists());
            }
            other => panic!("expected encoded, got {:?}", other),
        }

        assert_eq!(
            remaining(fx.frames.path()),
            vec![
                "2024-05-01T12-00-30-000Z.jpg",
                "2024-05-01T12-00-40-000Z.jpg",
                "notes.txt",
            ]
        );
        assert_eq!(remaining(fx.videos.path()), vec!["2024-05-01-12-00.mp4"]);

        let manifests = fx.tool.manifests.lock().unwrap();
        let listed: Vec<&str> = manifests[0]
            .lines()
            .filter(|l| l.starts_with("file "))
            .collect();
        assert_eq!(
            listed,
            vec![
                "file '2024-05-01T12-00-00-000Z.jpg'",
                "file '2024-05-01T12-00-10-000Z.jpg'",
                "file '2024-05-01T12-00-20-000Z.jpg'",
                "file '2024-05-01T12-00-20-000Z.jpg'",
            ]
        );
    }

    #[tokio::test]
    async fn test_shortfall_touches_nothing() {
        let fx = fixture(3, &FIVE[..2]);
        let candidates = scan_frames(fx.frames.path()).await.unwrap();

        match fx.encoder.encode(&candidates).await {
            BatchOutcome::Shortfall { available } => assert_eq!(available, 2),
            other => panic!("expected shortfall, got {:?}", other),
        }
        assert_eq!(remaining(fx.frames.path()).len(), 2);
        assert!(fx.tool.manifests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_newest_frame_deletes_nothing() {
        let fx = fixture(3, &FIVE[..2]);
        std::fs::write(fx.frames.path().join("garbled.jpg"), b"jpeg").unwrap();
        let mut candidates = scan_frames(fx.frames.path()).await.unwrap();
        // Put the unparseable frame in the newest slot
        candidates.rotate_left(1);

        match fx.encoder.encode(&candidates).await {
            BatchOutcome::Failed { batch, error } => {
                assert_eq!(batch.len(), 3);
                assert!(matches!(error, EncodeError::UnparseableTimestamp(ref name) if name == "garbled.jpg"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(remaining(fx.frames.path()).len(), 3);
        assert!(remaining(fx.videos.path()).is_empty());
    }

    #[tokio::test]
    async fn test_tool_failure_keeps_frames_and_removes_manifest() {
        let fx = fixture(3, &FIVE[..3]);
        fx.tool.fail.store(true, Ordering::SeqCst);
        let candidates = scan_frames(fx.frames.path()).await.unwrap();

        match fx.encoder.encode(&candidates).await {
            BatchOutcome::Failed { error, .. } => {
                assert!(matches!(error, EncodeError::Tool(MediaError::Exit { .. })))
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(remaining(fx.frames.path()), FIVE[..3].to_vec());
        assert!(!fx.encoder.manifest_path().exists());
        assert!(remaining(fx.videos.path()).is_empty());
    }

    #[tokio::test]
    async fn test_same_minute_batches_do_not_overwrite() {
        let fx = fixture(2, &FIVE[..4]);

        let first = scan_frames(fx.frames.path()).await.unwrap();
        assert!(matches!(fx.encoder.encode(&first).await, BatchOutcome::Encoded { .. }));
        let second = scan_frames(fx.frames.path()).await.unwrap();
        assert!(matches!(fx.encoder.encode(&second).await, BatchOutcome::Encoded { .. }));

        assert_eq!(
            remaining(fx.videos.path()),
            vec!["2024-05-01-12-00-1.mp4", "2024-05-01-12-00.mp4"]
        );
    }

    #[tokio::test]
    async fn test_undeletable_frame_is_reported_as_leftover() {
        let fx = fixture(3, &FIVE[..3]);
        *fx.tool.undeletable.lock().unwrap() = Some(FIVE[1].to_string());
        let candidates = scan_frames(fx.frames.path()).await.unwrap();

        match fx.encoder.encode(&candidates).await {
            BatchOutcome::Encoded { leftover, .. } => {
                let names: Vec<&str> = leftover.iter().map(|f| f.file_name()).collect();
                assert_eq!(names, vec![FIVE[1]]);
            }
            other => panic!("expected encoded, got {:?}", other),
        }
        assert_eq!(remaining(fx.frames.path()), vec![FIVE[1]]);
        assert_eq!(remaining(fx.videos.path()), vec!["2024-05-01-12-00.mp4"]);
    }

    #[test]
    fn test_manifest_escapes_quotes() {
        let frame = FrameFile::from_path(PathBuf::from("it's.jpg")).unwrap();
        let manifest = render_manifest(&[frame]);
        assert!(manifest.starts_with("ffconcat version 1.0\n"));
        assert!(manifest.contains("file 'it'\\''s.jpg'"));
        assert!(manifest.contains("duration 0.100"));
    }
}
