//! Runtime configuration for the browser core.
//!
//! Defaults mirror the values the control panel has always shipped with;
//! the CLI overrides individual fields through the builder-style setters.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;

/// Number of frames sampled into a video thumbnail.
pub const DEFAULT_FRAMES_PER_THUMBNAIL: usize = 155;

/// Number of worker threads decoding video thumbnails.
pub const DEFAULT_WORKERS: usize = 2;

/// Upper bound on worker threads.
pub const MAX_WORKERS: usize = 4;

/// Default thumbnail width in pixels.
pub const DEFAULT_THUMB_WIDTH: u32 = 400;

/// Smallest accepted thumbnail width.
pub const MIN_THUMB_WIDTH: u32 = 20;

/// Largest accepted thumbnail width.
pub const MAX_THUMB_WIDTH: u32 = 1000;

/// Delay between frames of an animated thumbnail.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(111);

/// How long shutdown waits for in-flight thumbnail jobs.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// JPEG quality for cached thumbnail frames (0-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Number of realized frame sets kept in memory.
pub const DEFAULT_MEMORY_ENTRIES: usize = 512;

/// Name of the on-disk frame cache directory inside the data directory.
pub const CACHE_DIR_NAME: &str = ".thumbcache";

/// How video frames are picked for a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingPolicy {
    /// Evenly spaced samples across the playback window.
    Spread,
    /// Consecutive frames from the window start, one per sample.
    #[default]
    Dense,
}

impl std::fmt::Display for SamplingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingPolicy::Spread => write!(f, "spread"),
            SamplingPolicy::Dense => write!(f, "dense"),
        }
    }
}

impl FromStr for SamplingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "spread" => Ok(SamplingPolicy::Spread),
            "dense" => Ok(SamplingPolicy::Dense),
            _ => bail!("Invalid sampling policy: {}. Valid options: spread, dense", s),
        }
    }
}

/// Configuration shared by the store, the thumbnail pipeline and the app.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the JSON documents and the frame cache.
    pub data_dir: PathBuf,
    pub frames_per_thumbnail: usize,
    pub sampling: SamplingPolicy,
    pub workers: usize,
    pub thumb_width: u32,
    pub frame_interval: Duration,
    pub shutdown_timeout: Duration,
    pub jpeg_quality: u8,
    pub memory_entries: usize,
    /// ffmpeg executable used to grab frames.
    pub ffmpeg: PathBuf,
    /// ffprobe executable used to read stream info.
    pub ffprobe: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            frames_per_thumbnail: DEFAULT_FRAMES_PER_THUMBNAIL,
            sampling: SamplingPolicy::default(),
            workers: DEFAULT_WORKERS,
            thumb_width: DEFAULT_THUMB_WIDTH,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            memory_entries: DEFAULT_MEMORY_ENTRIES,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn frames_per_thumbnail(mut self, frames: usize) -> Self {
        self.frames_per_thumbnail = frames.max(1);
        self
    }

    pub fn sampling(mut self, policy: SamplingPolicy) -> Self {
        self.sampling = policy;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.clamp(1, MAX_WORKERS);
        self
    }

    pub fn thumb_width(mut self, width: u32) -> Self {
        self.thumb_width = width.clamp(MIN_THUMB_WIDTH, MAX_THUMB_WIDTH);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn ffmpeg(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Directory for cached thumbnail frames.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join(CACHE_DIR_NAME)
    }
}
