//! Thumbnail generation using the image crate.
//!
//! Images become a single still scaled to the target width. Videos are
//! sampled through a `VideoBackend` into a sequence of scaled frames, taken
//! from the configured playback window when one is set.

use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use tracing::{debug, trace, warn};

use super::FrameSet;
use crate::config::{Config, SamplingPolicy};
use crate::models::VideoRange;
use crate::video::VideoBackend;

/// Per-call sampling settings for video thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateOptions {
    pub frames_per_thumbnail: usize,
    pub policy: SamplingPolicy,
}

impl GenerateOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            frames_per_thumbnail: config.frames_per_thumbnail.max(1),
            policy: config.sampling,
        }
    }
}

/// Thumbnail generator for stills and video frame sequences.
pub struct ThumbnailGenerator;

impl ThumbnailGenerator {
    /// Load an image and scale it to `target_width`.
    pub fn generate_image(path: &Path, target_width: u32) -> Result<FrameSet> {
        let img = Self::load_image(path)?;
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            anyhow::bail!("Degenerate image {:?}", path);
        }
        Ok(FrameSet::single(Self::scale_to_width(&img, target_width)))
    }

    fn load_image(path: &Path) -> Result<DynamicImage> {
        ImageReader::open(path)
            .with_context(|| format!("Failed to open image: {:?}", path))?
            .with_guessed_format()
            .with_context(|| format!("Failed to guess image format: {:?}", path))?
            .decode()
            .with_context(|| format!("Failed to decode image: {:?}", path))
    }

    /// Sample frames of a video and scale them to `target_width`.
    ///
    /// Returns `None` when the video cannot be opened, reports no frames, or
    /// not a single sample decodes. Individual frame failures are skipped.
    pub fn generate_video(
        backend: &dyn VideoBackend,
        path: &Path,
        target_width: u32,
        range: Option<VideoRange>,
        options: &GenerateOptions,
    ) -> Option<FrameSet> {
        let mut decoder = match backend.open(path) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!(?path, error = ?e, "Failed to open video");
                return None;
            }
        };

        let indices = sample_indices(decoder.frame_count(), decoder.fps(), range, options);
        if indices.is_empty() {
            debug!(
                ?path,
                frame_count = decoder.frame_count(),
                fps = decoder.fps(),
                duration = decoder.duration(),
                "Nothing to sample"
            );
            return None;
        }

        debug!(?path, samples = indices.len(), policy = %options.policy, "Sampling video frames");

        let mut frames = Vec::with_capacity(indices.len());
        for index in indices {
            match decoder.read_frame(index) {
                Ok(frame) => frames.push(Self::scale_to_width(&frame, target_width)),
                Err(e) => trace!(?path, index, error = %e, "Skipping frame"),
            }
        }
        drop(decoder);

        if frames.is_empty() {
            warn!(?path, "No frames could be decoded");
        }
        FrameSet::new(frames)
    }

    /// Scale to `target_width`, preserving aspect ratio.
    pub fn scale_to_width(img: &DynamicImage, target_width: u32) -> DynamicImage {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 || target_width == 0 {
            return img.clone();
        }
        let target_height = Self::height_for_width(width, height, target_width);
        img.resize_exact(target_width, target_height, FilterType::CatmullRom)
    }

    fn height_for_width(src_width: u32, src_height: u32, target_width: u32) -> u32 {
        let ratio = target_width as f64 / src_width as f64;
        ((src_height as f64 * ratio).round() as u32).max(1)
    }
}

/// Frame indices to decode for a video thumbnail.
///
/// The window is the video range when set, else the whole video. `Spread`
/// divides the window into equal steps; `Dense` takes consecutive frames from
/// the window start and does not stop at the window end. Indices never pass
/// the last frame of the stream.
pub fn sample_indices(
    frame_count: i64,
    fps: f64,
    range: Option<VideoRange>,
    options: &GenerateOptions,
) -> Vec<u64> {
    if frame_count <= 0 || !(fps > 0.0) {
        return Vec::new();
    }
    let duration = frame_count as f64 / fps;
    if duration <= 0.0 {
        return Vec::new();
    }

    let (start_second, end_second) = match range {
        Some(range) => (range.start, range.end),
        None => (0.0, duration),
    };
    let total = frame_count as u64;
    let start_frame = (start_second * fps).floor().max(0.0) as u64;
    let end_frame = ((end_second * fps).floor().max(0.0) as u64).min(total);
    let samples = options.frames_per_thumbnail.max(1);

    match options.policy {
        SamplingPolicy::Spread => {
            let step = (end_frame.saturating_sub(start_frame) / samples as u64).max(1);
            (start_frame..end_frame)
                .step_by(step as usize)
                .take(samples)
                .collect()
        }
        SamplingPolicy::Dense => (start_frame..start_frame.saturating_add(samples as u64))
            .take_while(|index| *index < total)
            .collect(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::video::VideoDecoder;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory video source: solid frames, optional failing indices.
    pub(crate) struct FakeBackend {
        pub frame_count: i64,
        pub fps: f64,
        pub width: u32,
        pub height: u32,
        pub failing: HashSet<u64>,
        pub opens: AtomicUsize,
        pub reads: Arc<Mutex<Vec<u64>>>,
    }

    impl FakeBackend {
        pub(crate) fn new(frame_count: i64, fps: f64) -> Self {
            Self {
                frame_count,
                fps,
                width: 160,
                height: 90,
                failing: HashSet::new(),
                opens: AtomicUsize::new(0),
                reads: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    struct FakeDecoder {
        frame_count: i64,
        fps: f64,
        width: u32,
        height: u32,
        failing: HashSet<u64>,
        reads: Arc<Mutex<Vec<u64>>>,
    }

    impl VideoDecoder for FakeDecoder {
        fn frame_count(&self) -> i64 {
            self.frame_count
        }

        fn fps(&self) -> f64 {
            self.fps
        }

        fn read_frame(&mut self, index: u64) -> Result<DynamicImage> {
            self.reads.lock().push(index);
            if self.failing.contains(&index) {
                anyhow::bail!("corrupt frame {}", index);
            }
            Ok(DynamicImage::new_rgb8(self.width, self.height))
        }
    }

    impl VideoBackend for FakeBackend {
        fn open(&self, _path: &Path) -> Result<Box<dyn VideoDecoder>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDecoder {
                frame_count: self.frame_count,
                fps: self.fps,
                width: self.width,
                height: self.height,
                failing: self.failing.clone(),
                reads: Arc::clone(&self.reads),
            }))
        }
    }

    fn spread(frames: usize) -> GenerateOptions {
        GenerateOptions {
            frames_per_thumbnail: frames,
            policy: SamplingPolicy::Spread,
        }
    }

    fn dense(frames: usize) -> GenerateOptions {
        GenerateOptions {
            frames_per_thumbnail: frames,
            policy: SamplingPolicy::Dense,
        }
    }

    #[test]
    fn test_spread_within_range() {
        // 30s at 30fps, range 10..20s.
        let range = VideoRange::new(10.0, 20.0).ok();
        let indices = sample_indices(900, 30.0, range, &spread(5));
        assert_eq!(indices, vec![300, 360, 420, 480, 540]);
        assert!(indices.iter().all(|i| (300..600).contains(i)));
    }

    #[test]
    fn test_spread_full_duration() {
        let indices = sample_indices(100, 25.0, None, &spread(4));
        assert_eq!(indices, vec![0, 25, 50, 75]);
    }

    #[test]
    fn test_spread_never_exceeds_sample_count() {
        let indices = sample_indices(103, 25.0, None, &spread(5));
        assert_eq!(indices.len(), 5);
    }

    #[test]
    fn test_spread_short_window_uses_step_one() {
        let range = VideoRange::new(1.0, 1.1).ok();
        let indices = sample_indices(300, 30.0, range, &spread(5));
        assert_eq!(indices, vec![30, 31, 32]);
    }

    #[test]
    fn test_dense_ignores_range_end() {
        let range = VideoRange::new(10.0, 10.1).ok();
        let indices = sample_indices(900, 30.0, range, &dense(5));
        assert_eq!(indices, vec![300, 301, 302, 303, 304]);
    }

    #[test]
    fn test_dense_stops_at_stream_end() {
        let indices = sample_indices(3, 30.0, None, &dense(5));
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_no_samples_for_empty_stream() {
        assert!(sample_indices(0, 30.0, None, &spread(5)).is_empty());
        assert!(sample_indices(100, 0.0, None, &spread(5)).is_empty());
        assert!(sample_indices(-1, 30.0, None, &dense(5)).is_empty());
    }

    #[test]
    fn test_generate_video_skips_failed_frames() {
        let mut backend = FakeBackend::new(900, 30.0);
        backend.failing.insert(360);
        let range = VideoRange::new(10.0, 20.0).ok();

        let frames = ThumbnailGenerator::generate_video(
            &backend,
            Path::new("/m/clip.mp4"),
            80,
            range,
            &spread(5),
        )
        .unwrap();

        assert_eq!(frames.len(), 4);
        assert_eq!(frames.first().dimensions(), (80, 45));
        assert_eq!(*backend.reads.lock(), vec![300, 360, 420, 480, 540]);
    }

    #[test]
    fn test_generate_video_all_frames_failing() {
        let mut backend = FakeBackend::new(2, 30.0);
        backend.failing.extend([0, 1]);
        let result = ThumbnailGenerator::generate_video(
            &backend,
            Path::new("/m/clip.mp4"),
            80,
            None,
            &dense(5),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_generate_video_empty_stream() {
        let backend = FakeBackend::new(0, 30.0);
        let result = ThumbnailGenerator::generate_video(
            &backend,
            Path::new("/m/clip.mp4"),
            80,
            None,
            &dense(5),
        );
        assert!(result.is_none());
        assert!(backend.reads.lock().is_empty());
    }

    #[test]
    fn test_scale_to_width_preserves_aspect() {
        let img = DynamicImage::new_rgb8(1920, 1080);
        let scaled = ThumbnailGenerator::scale_to_width(&img, 400);
        assert_eq!(scaled.dimensions(), (400, 225));

        // Upscaling follows the requested width too.
        let img = DynamicImage::new_rgb8(10, 20);
        let scaled = ThumbnailGenerator::scale_to_width(&img, 40);
        assert_eq!(scaled.dimensions(), (40, 80));
    }

    #[test]
    fn test_height_never_zero() {
        assert_eq!(ThumbnailGenerator::height_for_width(10000, 1, 20), 1);
    }

    #[test]
    fn test_generate_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        DynamicImage::new_rgb8(200, 100).save(&path).unwrap();

        let frames = ThumbnailGenerator::generate_image(&path, 50).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames.first().dimensions(), (50, 25));
    }

    #[test]
    fn test_generate_image_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not a real jpeg file").unwrap();
        assert!(ThumbnailGenerator::generate_image(&path, 50).is_err());
    }
}
