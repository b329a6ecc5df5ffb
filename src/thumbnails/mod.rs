//! Thumbnail pipeline for the media browser.
//!
//! This module provides:
//! - `generator` - Scaled stills for images and sampled frames for videos
//! - `cache` - Per-path frame files on disk plus an in-memory LRU
//! - `queue` - Bounded worker pool for off-thread video work
//! - `orchestrator` - Population passes, invalidation and result reconciliation

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;

pub mod cache;
pub mod generator;
pub mod orchestrator;
pub mod queue;

pub use cache::{CacheFileSet, CacheKey, ThumbnailCache};
pub use generator::{GenerateOptions, ThumbnailGenerator};
pub use orchestrator::{Progress, ThumbnailEvent, ThumbnailOrchestrator, ThumbnailState};
pub use queue::{ThumbnailQueue, ThumbnailQueueBuilder};

/// Ordered, non-empty sequence of thumbnail frames.
///
/// Images produce a single frame, videos up to the configured frame count.
/// Cloning is cheap; frames are shared.
#[derive(Debug, Clone)]
pub struct FrameSet {
    frames: Arc<Vec<DynamicImage>>,
}

impl FrameSet {
    /// Wrap `frames`, or `None` if there are none.
    pub fn new(frames: Vec<DynamicImage>) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        Some(Self {
            frames: Arc::new(frames),
        })
    }

    pub fn single(frame: DynamicImage) -> Self {
        Self {
            frames: Arc::new(vec![frame]),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; [`FrameSet::new`] rejects an empty list.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn frames(&self) -> &[DynamicImage] {
        &self.frames
    }

    pub fn first(&self) -> &DynamicImage {
        &self.frames[0]
    }
}

/// Auto-advancing view over a frame set, as shown in the thumbnail grid.
#[derive(Debug, Clone)]
pub struct FrameCycler {
    frames: FrameSet,
    interval: Duration,
}

impl FrameCycler {
    pub fn new(frames: FrameSet, interval: Duration) -> Self {
        Self { frames, interval }
    }

    /// Frame index to show after `elapsed` time.
    pub fn index_at(&self, elapsed: Duration) -> usize {
        let interval = self.interval.as_millis().max(1);
        ((elapsed.as_millis() / interval) % self.frames.len() as u128) as usize
    }

    pub fn frame_at(&self, elapsed: Duration) -> &DynamicImage {
        &self.frames.frames()[self.index_at(elapsed)]
    }

    pub fn frames(&self) -> &FrameSet {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(count: usize) -> FrameSet {
        FrameSet::new(
            (0..count)
                .map(|i| DynamicImage::new_rgb8(i as u32 + 1, 1))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_frame_set_never_empty() {
        assert!(FrameSet::new(Vec::new()).is_none());
        let set = FrameSet::single(DynamicImage::new_rgb8(4, 4));
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_cycler_wraps_around() {
        let cycler = FrameCycler::new(frames(3), Duration::from_millis(100));
        assert_eq!(cycler.index_at(Duration::ZERO), 0);
        assert_eq!(cycler.index_at(Duration::from_millis(99)), 0);
        assert_eq!(cycler.index_at(Duration::from_millis(100)), 1);
        assert_eq!(cycler.index_at(Duration::from_millis(250)), 2);
        assert_eq!(cycler.index_at(Duration::from_millis(300)), 0);
        assert_eq!(cycler.frame_at(Duration::from_millis(150)).width(), 2);
    }

    #[test]
    fn test_cycler_single_frame() {
        let cycler = FrameCycler::new(frames(1), Duration::from_millis(111));
        assert_eq!(cycler.index_at(Duration::from_secs(60)), 0);
    }
}
