//! ffmpeg-backed media tool
//!
//! Frame grabs pull a single JPEG from the stream over TCP transport. Batch
//! encodes feed a concat manifest to libx264 with a fixed frame rate and
//! pixel format. Both run under a watchdog; the child is killed when the
//! deadline passes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{MediaError, MediaTool, VIDEO_CODEC, VIDEO_FRAME_RATE, VIDEO_PIXEL_FORMAT};
use crate::config::Config;

/// Keep this much of stderr in error messages
const STDERR_TAIL_BYTES: usize = 512;

#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg_path: PathBuf,
    /// Source URL including credentials (never logged)
    source_url: String,
    transport: String,
    capture_timeout: Duration,
    encode_timeout: Duration,
}

impl FfmpegTool {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            ffmpeg_path: config.tool.ffmpeg_path.clone(),
            source_url: config.source_url()?.to_string(),
            transport: config.source.transport.clone(),
            capture_timeout: config.capture_timeout(),
            encode_timeout: config.encode_timeout(),
        })
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-nostdin")
            .arg("-y");
        command
    }

    fn grab_args(&self, command: &mut Command, dest: &Path) {
        if self.source_url.starts_with("rtsp") {
            command.arg("-rtsp_transport").arg(&self.transport);
        }
        command
            .arg("-i")
            .arg(&self.source_url)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .arg("-f")
            .arg("image2")
            .arg(dest);
    }

    fn encode_args(command: &mut Command, manifest: &Path, output: &Path) {
        command
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(manifest)
            .arg("-r")
            .arg(VIDEO_FRAME_RATE.to_string())
            .arg("-c:v")
            .arg(VIDEO_CODEC)
            .arg("-pix_fmt")
            .arg(VIDEO_PIXEL_FORMAT)
            .arg("-movflags")
            .arg("+faststart")
            .arg("-f")
            .arg("mp4")
            .arg(output);
    }

    async fn run(&self, mut command: Command, timeout: Duration) -> Result<(), MediaError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| MediaError::Spawn {
            program: self.ffmpeg_path.clone(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(MediaError::Wait)?,
            Err(_) => return Err(MediaError::Timeout(timeout)),
        };

        if !output.status.success() {
            return Err(MediaError::Exit {
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(())
    }
}

impl MediaTool for FfmpegTool {
    async fn grab_frame(&self, dest: &Path) -> Result<(), MediaError> {
        let mut command = self.base_command();
        self.grab_args(&mut command, dest);
        debug!("Grabbing frame into {:?}", dest);

        self.run(command, self.capture_timeout).await?;

        let path = dest.to_path_buf();
        tokio::task::spawn_blocking(move || verify_image(&path))
            .await
            .map_err(|e| MediaError::InvalidOutput {
                path: dest.to_path_buf(),
                reason: format!("image check did not complete: {}", e),
            })?
    }

    async fn encode_batch(&self, manifest: &Path, output: &Path) -> Result<(), MediaError> {
        let mut command = self.base_command();
        Self::encode_args(&mut command, manifest, output);
        debug!("Encoding {:?} into {:?}", manifest, output);

        self.run(command, self.encode_timeout).await
    }
}

/// Reject truncated or non-image output before it is counted as a frame
fn verify_image(path: &Path) -> Result<(), MediaError> {
    match image::image_dimensions(path) {
        Ok((width, height)) if width > 0 && height > 0 => Ok(()),
        Ok((width, height)) => {
            let _ = std::fs::remove_file(path);
            Err(MediaError::InvalidOutput {
                path: path.to_path_buf(),
                reason: format!("empty image {}x{}", width, height),
            })
        }
        Err(e) => {
            let _ = std::fs::remove_file(path);
            Err(MediaError::InvalidOutput {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }

    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
