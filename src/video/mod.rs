//! Video frame access for thumbnail generation.
//!
//! The thumbnail pipeline only needs three things from a video: how many
//! frames it has, its frame rate, and the decoded image at a frame index.
//! `VideoBackend` opens a file and hands out a `VideoDecoder` for it; the
//! decoder is dropped once sampling is done.

use std::path::Path;

use anyhow::Result;
use image::DynamicImage;

pub mod ffmpeg;

pub use ffmpeg::FfmpegBackend;

/// An opened video stream.
pub trait VideoDecoder {
    /// Total number of frames; zero or negative when unknown.
    fn frame_count(&self) -> i64;

    /// Frames per second; zero when unknown.
    fn fps(&self) -> f64;

    /// Seek to `index` and decode that frame.
    fn read_frame(&mut self, index: u64) -> Result<DynamicImage>;

    /// Duration in seconds derived from frame count and rate.
    fn duration(&self) -> f64 {
        let fps = self.fps();
        if fps > 0.0 {
            self.frame_count() as f64 / fps
        } else {
            0.0
        }
    }
}

/// Opens videos for decoding. Shared by all thumbnail workers.
pub trait VideoBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>>;
}
