//! Frame and video file naming
//!
//! Frames are named by their UTC capture time with colons and periods
//! replaced, e.g. `2024-05-01T12-00-20-000Z.jpg`, so lexical order equals
//! chronological order. Videos are named by the minute of their newest
//! frame, e.g. `2024-05-01-12-00.mp4`.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

pub const FRAME_EXTENSION: &str = "jpg";
pub const VIDEO_EXTENSION: &str = "mp4";

const FRAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";
const VIDEO_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M";

/// File name for a frame captured at `at`
pub fn frame_file_name(at: DateTime<Utc>) -> String {
    format!("{}.{}", at.format(FRAME_TIMESTAMP_FORMAT), FRAME_EXTENSION)
}

/// Recover the capture time embedded in a frame file name
pub fn parse_frame_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let stem = file_name.strip_suffix(FRAME_EXTENSION)?.strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stem, FRAME_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Video file stem for a batch whose newest frame was captured at `at`
pub fn video_file_stem(at: DateTime<Utc>) -> String {
    at.format(VIDEO_TIMESTAMP_FORMAT).to_string()
}

/// A frame file found on disk, with its timestamp parsed once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFile {
    pub path: PathBuf,
    /// None when the name does not follow the frame naming scheme
    pub captured_at: Option<DateTime<Utc>>,
}

impl FrameFile {
    /// Wrap `path` if it carries the frame extension
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION));
        if !is_frame {
            return None;
        }

        let captured_at = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_frame_timestamp);
        Some(Self { path, captured_at })
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Ord for FrameFile {
    // Parsed time, then file name, then full path; unparseable names sort oldest.
    // Equal only when the paths are equal, matching the derived PartialEq.
    fn cmp(&self, other: &Self) -> Ordering {
        self.captured_at
            .cmp(&other.captured_at)
            .then_with(|| self.file_name().cmp(other.file_name()))
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for FrameFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
