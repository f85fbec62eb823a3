//! Single-frame capture against the live source

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::frame::{frame_file_name, FrameFile};
use crate::media::{MediaError, MediaTool};

/// Grabs one frame per call into the frame directory
pub struct FrameCapturer<M> {
    tool: Arc<M>,
    frame_dir: PathBuf,
    /// Millisecond timestamp of the newest frame name handed out
    last_issued_ms: Option<i64>,
}

impl<M: MediaTool> FrameCapturer<M> {
    pub fn new(tool: Arc<M>, frame_dir: PathBuf) -> Self {
        Self {
            tool,
            frame_dir,
            last_issued_ms: None,
        }
    }

    /// Capture one frame, returning its path on success.
    ///
    /// A failed grab leaves nothing behind in the frame directory.
    pub async fn capture(&mut self) -> Result<PathBuf, MediaError> {
        let timestamp = self.next_timestamp();
        let path = self.frame_dir.join(frame_file_name(timestamp));

        match self.tool.grab_frame(&path).await {
            Ok(()) => Ok(path),
            Err(e) => {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!("Removed partial frame {:?}", path),
                    Err(remove_err) if remove_err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(remove_err) => {
                        warn!("Failed to remove partial frame {:?}: {}", path, remove_err)
                    }
                }
                Err(e)
            }
        }
    }

    /// Never issue a name at or before a frame already on disk
    pub fn observe(&mut self, newest: Option<&FrameFile>) {
        let Some(at) = newest.and_then(|frame| frame.captured_at) else {
            return;
        };
        let ms = at.timestamp_millis();
        if self.last_issued_ms.map_or(true, |last| ms > last) {
            debug!("Frame clock floor raised to {}", at);
            self.last_issued_ms = Some(ms);
        }
    }

    /// Wall clock at millisecond resolution, forced strictly increasing
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now_ms = Utc::now().timestamp_millis();
        let ms = match self.last_issued_ms {
            Some(last) if now_ms <= last => last + 1,
            _ => now_ms,
        };
        self.last_issued_ms = Some(ms);
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::parse_frame_timestamp;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubTool {
        fail: AtomicBool,
    }

    impl MediaTool for StubTool {
        async fn grab_frame(&self, dest: &Path) -> Result<(), MediaError> {
            // Failing grabs still leave a partial file, like an interrupted ffmpeg
            std::fs::write(dest, b"frame").unwrap();
            if self.fail.load(Ordering::SeqCst) {
                return Err(MediaError::Exit {
                    code: Some(1),
                    stderr: "Connection refused".to_string(),
                });
            }
            Ok(())
        }

        async fn encode_batch(&self, _manifest: &Path, _output: &Path) -> Result<(), MediaError> {
            unreachable!("capturer never encodes")
        }
    }

    fn capturer(dir: &Path, fail: bool) -> FrameCapturer<StubTool> {
        let tool = Arc::new(StubTool {
            fail: AtomicBool::new(fail),
        });
        FrameCapturer::new(tool, dir.to_path_buf())
    }

    #[tokio::test]
    async fn test_back_to_back_captures_get_increasing_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut capturer = capturer(dir.path(), false);

        let mut names = Vec::new();
        for _ in 0..5 {
            let path = capturer.capture().await.unwrap();
            names.push(path.file_name().unwrap().to_str().unwrap().to_string());
        }

        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, names);
        assert!(names.iter().all(|n| parse_frame_timestamp(n).is_some()));
    }

    #[tokio::test]
    async fn test_failed_capture_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut capturer = capturer(dir.path(), true);

        assert!(capturer.capture().await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_observe_raises_clock_floor() {
        let dir = tempfile::tempdir().unwrap();
        let mut capturer = capturer(dir.path(), false);

        let future = FrameFile::from_path(dir.path().join("2999-01-01T00-00-00-000Z.jpg")).unwrap();
        capturer.observe(Some(&future));

        let next = capturer.next_timestamp();
        assert!(Some(next) > future.captured_at);
    }
}
