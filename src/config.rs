//! Configuration management for camlapse

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "CAMLAPSE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Live camera source
    #[serde(default)]
    pub source: SourceConfig,

    /// Capture and batch cadence
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Frame, video and quarantine directories
    #[serde(default)]
    pub storage: StorageConfig,

    /// External media tool settings
    #[serde(default)]
    pub tool: ToolConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Stream address, e.g. rtsp://camera.local:554/stream1
    #[serde(default)]
    pub url: String,

    /// Optional credentials, merged into the URL at grab time
    pub username: Option<String>,
    pub password: Option<String>,

    /// RTSP transport passed to the media tool
    #[serde(default = "default_transport")]
    pub transport: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between frame grabs
    #[serde(default = "default_capture_interval")]
    pub capture_interval_secs: u64,

    /// Seconds of wall time covered by one video
    #[serde(default = "default_video_interval")]
    pub video_interval_secs: u64,

    /// Consecutive failed attempts before a batch is quarantined (0 = never)
    #[serde(default = "default_max_batch_attempts")]
    pub max_batch_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Working directory for captured frames and the transient manifest
    #[serde(default = "default_frame_directory")]
    pub frame_directory: PathBuf,

    /// Where finished videos are written
    #[serde(default = "default_video_directory")]
    pub video_directory: PathBuf,

    /// Frames from batches that exhausted their retries
    #[serde(default = "default_quarantine_directory")]
    pub quarantine_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// ffmpeg binary (looked up on PATH when not absolute)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Watchdog for a single frame grab
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_secs: u64,

    /// Watchdog for a single batch encode
    #[serde(default = "default_encode_timeout")]
    pub encode_timeout_secs: u64,
}

// Default value functions
fn default_transport() -> String {
    "tcp".to_string()
}

fn default_capture_interval() -> u64 {
    10
}

fn default_video_interval() -> u64 {
    300 // 30 frames per video at the default capture interval
}

fn default_max_batch_attempts() -> u32 {
    5
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "camlapse", "recorder")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("camlapse"))
}

fn default_frame_directory() -> PathBuf {
    default_data_dir().join("frames")
}

fn default_video_directory() -> PathBuf {
    default_data_dir().join("videos")
}

fn default_quarantine_directory() -> PathBuf {
    default_data_dir().join("quarantine")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_capture_timeout() -> u64 {
    30
}

fn default_encode_timeout() -> u64 {
    600
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            transport: default_transport(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            capture_interval_secs: default_capture_interval(),
            video_interval_secs: default_video_interval(),
            max_batch_attempts: default_max_batch_attempts(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            frame_directory: default_frame_directory(),
            video_directory: default_video_directory(),
            quarantine_directory: default_quarantine_directory(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            capture_timeout_secs: default_capture_timeout(),
            encode_timeout_secs: default_encode_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            tool: ToolConfig::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config = Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path);
            Ok(config)
        } else {
            // Create default config
            let config = Config {
                config_path: Some(config_path),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        if let Ok(override_path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(override_path));
        }

        let proj_dirs = directories::ProjectDirs::from("dev", "camlapse", "recorder")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            bail!("source.url is not set");
        }
        url::Url::parse(&self.source.url)
            .with_context(|| format!("source.url is not a valid URL: {}", self.source.url))?;

        let capture = self.schedule.capture_interval_secs;
        let video = self.schedule.video_interval_secs;
        if capture == 0 || video == 0 {
            bail!("capture_interval_secs and video_interval_secs must be greater than zero");
        }
        if video < capture || video % capture != 0 {
            bail!(
                "video_interval_secs ({}) must be a whole multiple of capture_interval_secs ({})",
                video,
                capture
            );
        }
        if self.storage.frame_directory == self.storage.video_directory {
            bail!("frame_directory and video_directory must differ");
        }
        if self.storage.quarantine_directory == self.storage.frame_directory {
            bail!("quarantine_directory and frame_directory must differ");
        }
        Ok(())
    }

    /// Number of frames in one batch (N)
    pub fn batch_size(&self) -> usize {
        (self.schedule.video_interval_secs / self.schedule.capture_interval_secs.max(1)) as usize
    }

    /// Capture period (P)
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.capture_interval_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.tool.capture_timeout_secs)
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.tool.encode_timeout_secs)
    }

    /// Source URL with credentials applied
    pub fn source_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.source.url)
            .with_context(|| format!("Invalid source URL: {}", self.source.url))?;

        if let Some(username) = &self.source.username {
            url.set_username(username)
                .map_err(|_| anyhow::anyhow!("Source URL cannot carry a username"))?;
        }
        if let Some(password) = &self.source.password {
            url.set_password(Some(password))
                .map_err(|_| anyhow::anyhow!("Source URL cannot carry a password"))?;
        }
        Ok(url)
    }

    /// Source URL safe for logging (password stripped)
    pub fn redacted_source_url(&self) -> String {
        match self.source_url() {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => self.source.url.clone(),
        }
    }

    /// Create the frame, video and quarantine directories
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.storage.frame_directory,
            &self.storage.video_directory,
            &self.storage.quarantine_directory,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {:?}", dir))?;
        }

        // Fail at startup rather than on the first capture
        std::fs::read_dir(&self.storage.frame_directory).with_context(|| {
            format!(
                "Frame directory is not readable: {:?}",
                self.storage.frame_directory
            )
        })?;
        Ok(())
    }
}
