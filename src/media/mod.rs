//! External media tool seam
//!
//! Frame grabs and batch encodes are delegated to an external process. The
//! scheduler only sees the `MediaTool` trait: one call in, one `Result` out.

mod ffmpeg;

pub use ffmpeg::FfmpegTool;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Output frame rate of every video
pub const VIDEO_FRAME_RATE: u32 = 10;

/// Output pixel format of every video
pub const VIDEO_PIXEL_FORMAT: &str = "yuv420p";

/// Output codec of every video
pub const VIDEO_CODEC: &str = "libx264";

/// Why a media tool invocation did not succeed
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for media tool: {0}")]
    Wait(#[source] std::io::Error),

    #[error("media tool exited with {}: {stderr}", exit_label(.code))]
    Exit { code: Option<i32>, stderr: String },

    #[error("media tool did not finish within {0:?}")]
    Timeout(Duration),

    #[error("media tool produced an unusable file {path:?}: {reason}")]
    InvalidOutput { path: PathBuf, reason: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Trait for the process that talks to the camera and assembles videos
pub trait MediaTool: Send + Sync {
    /// Grab exactly one still frame from the live source into `dest`
    fn grab_frame(&self, dest: &Path) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Concatenate the frames listed in `manifest` into a video at `output`
    fn encode_batch(
        &self,
        manifest: &Path,
        output: &Path,
    ) -> impl Future<Output = Result<(), MediaError>> + Send;
}
