//! Frame capture
//!
//! Naming rules for frame and video files, and the capturer that asks the
//! media tool for one still frame at a time.

mod capturer;
mod frame;

pub use capturer::FrameCapturer;
pub use frame::{video_file_stem, FrameFile, VIDEO_EXTENSION};
