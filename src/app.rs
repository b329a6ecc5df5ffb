//! Session state of the media browser.
//!
//! `App` owns the store, the scanned and filtered file lists, the tag filter
//! and the thumbnail orchestrator, and exposes the operations of the control
//! panel. Everything here runs on the owning thread.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{Config, MAX_THUMB_WIDTH, MIN_THUMB_WIDTH};
use crate::error::{DeleteError, ValidationError};
use crate::models::{MediaStore, VideoRange};
use crate::scanner::{find_duplicates, scan_folder};
use crate::slideshow::{self, Slideshow};
use crate::tags::{self, TagSet};
use crate::thumbnails::{FrameCycler, ThumbnailEvent, ThumbnailOrchestrator};
use crate::video::{FfmpegBackend, VideoBackend};

/// What the control panel shows for the selected item.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDetails {
    pub path: PathBuf,
    pub volume: u8,
    pub range: Option<VideoRange>,
    pub tags: TagSet,
}

pub struct App {
    config: Config,
    store: MediaStore,
    folder: Option<PathBuf>,
    /// Everything the last scan found.
    files: Vec<PathBuf>,
    /// The visible subset after tag filtering.
    filtered: Vec<PathBuf>,
    selected_tags: BTreeSet<String>,
    untagged_only: bool,
    thumbnails: ThumbnailOrchestrator,
    /// Start a thumbnail pass whenever the visible list changes.
    auto_thumbnails: bool,
    current: Option<PathBuf>,
}

impl App {
    /// Open the store in the configured data directory, decoding videos with
    /// the configured ffmpeg tools.
    pub fn open(config: Config) -> Result<Self> {
        let backend = Arc::new(FfmpegBackend::new(&config.ffmpeg, &config.ffprobe));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: Config, backend: Arc<dyn VideoBackend>) -> Result<Self> {
        let store = MediaStore::open(&config.data_dir);
        let thumbnails = ThumbnailOrchestrator::new(&config, backend)?;

        Ok(Self {
            config,
            store,
            folder: None,
            files: Vec::new(),
            filtered: Vec::new(),
            selected_tags: BTreeSet::new(),
            untagged_only: false,
            thumbnails,
            auto_thumbnails: true,
            current: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn filtered_files(&self) -> &[PathBuf] {
        &self.filtered
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    pub fn thumbnails(&self) -> &ThumbnailOrchestrator {
        &self.thumbnails
    }

    // =========================================================================
    // Folder
    // =========================================================================

    /// Remember `dir` as the last folder and load it.
    pub fn choose_folder(&mut self, dir: &Path) -> Result<()> {
        if let Err(e) = self.store.set_last_folder(dir) {
            warn!(?dir, error = ?e, "Failed to save last folder");
        }
        self.load_folder(dir)
    }

    /// Load the folder saved by the previous session, if it still exists.
    pub fn restore_last_folder(&mut self) -> Result<bool> {
        let Some(dir) = self.store.last_folder().map(Path::to_path_buf) else {
            return Ok(false);
        };
        if !dir.is_dir() {
            debug!(?dir, "Last folder no longer exists");
            return Ok(false);
        }
        self.load_folder(&dir)?;
        Ok(true)
    }

    /// Scan `dir`, re-read the tag document and start a thumbnail pass.
    pub fn load_folder(&mut self, dir: &Path) -> Result<()> {
        let files = scan_folder(dir)?;
        info!(?dir, count = files.len(), "Loaded folder");

        self.folder = Some(dir.to_path_buf());
        self.files = files;
        self.current = None;
        self.store.reload_tags();

        let known = self.tag_frequencies();
        self.selected_tags.retain(|tag| known.contains_key(tag));

        self.apply_filter();
        Ok(())
    }

    // =========================================================================
    // Tag filter
    // =========================================================================

    /// Tag counts over the scanned files.
    pub fn tag_frequencies(&self) -> BTreeMap<String, usize> {
        tags::tag_frequencies(&self.files, self.store.tags())
    }

    /// Sorted tag names for completion.
    pub fn tag_names(&self) -> Vec<String> {
        self.tag_frequencies().into_keys().collect()
    }

    pub fn selected_tags(&self) -> &BTreeSet<String> {
        &self.selected_tags
    }

    /// Show only files carrying one of `selected`; empty shows everything.
    pub fn select_tags<I, S>(&mut self, selected: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.selected_tags = TagSet::from_tokens(selected)
            .iter()
            .map(str::to_string)
            .collect();
        self.apply_filter();
    }

    /// Show only files without tags. Takes precedence over the tag selection.
    pub fn set_untagged_only(&mut self, untagged_only: bool) {
        self.untagged_only = untagged_only;
        self.apply_filter();
    }

    pub fn untagged_only(&self) -> bool {
        self.untagged_only
    }

    fn apply_filter(&mut self) {
        self.filtered = if self.untagged_only {
            tags::filter_untagged(&self.files, self.store.tags())
        } else {
            tags::filter_by_tags(&self.files, self.store.tags(), &self.selected_tags)
        };
        debug!(
            visible = self.filtered.len(),
            total = self.files.len(),
            "Applied tag filter"
        );
        self.populate_thumbnails();
    }

    fn populate_thumbnails(&mut self) {
        if self.auto_thumbnails {
            self.refresh_thumbnails();
        }
    }

    // =========================================================================
    // Thumbnails
    // =========================================================================

    /// Parse and apply a new thumbnail width, then repopulate.
    pub fn set_thumbnail_width(&mut self, input: &str) -> Result<u32, ValidationError> {
        let trimmed = input.trim();
        let width: i64 = trimmed
            .parse()
            .map_err(|_| ValidationError::NotANumber(trimmed.to_string()))?;
        if !(MIN_THUMB_WIDTH as i64..=MAX_THUMB_WIDTH as i64).contains(&width) {
            return Err(ValidationError::WidthOutOfRange(width));
        }

        let width = width as u32;
        self.thumbnails.set_width(width);
        self.populate_thumbnails();
        Ok(width)
    }

    /// Turn automatic thumbnail passes on list changes on or off. Callers
    /// that only list files turn them off and never decode anything.
    pub fn set_auto_thumbnails(&mut self, enabled: bool) {
        self.auto_thumbnails = enabled;
    }

    /// Start a thumbnail pass over the visible list.
    pub fn refresh_thumbnails(&mut self) {
        let store = &self.store;
        self.thumbnails
            .populate(&self.filtered, |path| store.video_range(path));
    }

    pub fn thumbnail_width(&self) -> u32 {
        self.thumbnails.width()
    }

    pub fn poll_thumbnails(&mut self) -> Vec<ThumbnailEvent> {
        self.thumbnails.poll_results()
    }

    /// Animated view of the realized thumbnail of `path`.
    pub fn thumbnail_cycler(&self, path: &Path) -> Option<FrameCycler> {
        self.thumbnails
            .frames(path)
            .map(|frames| FrameCycler::new(frames, self.config.frame_interval))
    }

    /// Poll until the current pass has no outstanding jobs.
    pub fn wait_thumbnails(&mut self, timeout: std::time::Duration) -> Vec<ThumbnailEvent> {
        self.thumbnails.drain(timeout)
    }

    // =========================================================================
    // Selected media
    // =========================================================================

    /// Make `path` the current item and return its stored settings.
    pub fn select_media(&mut self, path: &Path) -> MediaDetails {
        self.current = Some(path.to_path_buf());
        MediaDetails {
            path: path.to_path_buf(),
            volume: self.store.volume(path),
            range: self.store.video_range(path),
            tags: self.store.tag_set(path),
        }
    }

    /// Pick a random item from the visible list, avoiding the current one.
    pub fn random_media<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<PathBuf> {
        let path = slideshow::pick_random(&self.filtered, self.current.as_deref(), rng)?;
        self.current = Some(path.clone());
        Some(path)
    }

    /// Validate and store a playback window, then rebuild the thumbnail.
    pub fn set_video_range(
        &mut self,
        path: &Path,
        start: &str,
        end: &str,
    ) -> Result<VideoRange, ValidationError> {
        let range = VideoRange::parse(start, end)?;

        if let Err(e) = self.store.set_video_range(path, range) {
            warn!(?path, error = ?e, "Failed to save video range");
        }
        info!(?path, start = range.start, end = range.end, "Set video range");
        self.thumbnails.invalidate(path, Some(range));
        Ok(range)
    }

    /// Seek target for the current video when it ran past its window.
    pub fn range_seek(&self, position: f64, ignore_range: bool) -> Option<f64> {
        let path = self.current.as_deref()?;
        slideshow::range_loop_check(position, self.store.video_range(path), ignore_range)
    }

    /// Replace the tags of `path` with the tokens in `input`.
    pub fn set_tags(&mut self, path: &Path, input: &str) -> TagSet {
        let tags = TagSet::parse(input);
        if let Err(e) = self.store.set_tags(path, &tags) {
            warn!(?path, error = ?e, "Failed to save tags");
        }
        tags
    }

    /// Add one tag to `path`. Blank input or a tag already present is a no-op.
    pub fn add_tag(&mut self, path: &Path, token: &str) -> TagSet {
        let mut tags = self.store.tag_set(path);
        if !tags.insert(token) {
            return tags;
        }
        if let Err(e) = self.store.set_tags(path, &tags) {
            warn!(?path, error = ?e, "Failed to save tags");
        }
        debug!(?path, token, "Added tag");
        tags
    }

    pub fn volume(&self, path: &Path) -> u8 {
        self.store.volume(path)
    }

    pub fn set_volume(&mut self, path: &Path, volume: u8) {
        if let Err(e) = self.store.set_volume(path, volume) {
            warn!(?path, error = ?e, "Failed to save volume");
        }
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete `path` from disk once `confirm` agrees.
    ///
    /// Tags, ranges and volume stored for the path are kept.
    pub fn delete_media<F>(&mut self, path: &Path, confirm: F) -> Result<(), DeleteError>
    where
        F: FnOnce(&Path) -> bool,
    {
        if !confirm(path) {
            return Err(DeleteError::NotConfirmed(path.to_path_buf()));
        }

        std::fs::remove_file(path).map_err(|source| DeleteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(?path, "Deleted media");

        self.forget(std::slice::from_ref(&path.to_path_buf()));
        self.populate_thumbnails();
        Ok(())
    }

    /// Delete files whose contents repeat an earlier file of the folder.
    ///
    /// Returns the number of files removed.
    pub fn cleanup_duplicates(&mut self) -> usize {
        let mut removed = Vec::new();
        for path in find_duplicates(&self.files) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) => warn!(?path, error = ?e, "Failed to delete duplicate"),
            }
        }

        info!(removed = removed.len(), "Removed duplicates");
        if !removed.is_empty() {
            self.forget(&removed);
            self.populate_thumbnails();
        }
        removed.len()
    }

    fn forget(&mut self, removed: &[PathBuf]) {
        self.files.retain(|p| !removed.contains(p));
        self.filtered.retain(|p| !removed.contains(p));
        if self
            .current
            .as_ref()
            .is_some_and(|current| removed.contains(current))
        {
            self.current = None;
        }
    }

    // =========================================================================
    // Slideshow
    // =========================================================================

    /// Start a slideshow over the visible list.
    pub fn start_slideshow(&self, seconds: &str) -> Result<Slideshow, ValidationError> {
        Slideshow::start(seconds, &self.filtered)
    }

    /// Stop thumbnail workers. Returns false if some were still running at
    /// the timeout.
    pub fn shutdown(&mut self) -> bool {
        info!("Shutting down");
        self.thumbnails.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DEFAULT_VOLUME, TAGS_FILE};
    use crate::thumbnails::generator::tests::FakeBackend;
    use crate::thumbnails::ThumbnailState;
    use image::DynamicImage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _data: TempDir,
        media: TempDir,
        app: App,
    }

    fn fixture() -> Fixture {
        let data = tempdir().unwrap();
        let media = tempdir().unwrap();
        DynamicImage::new_rgb8(64, 32)
            .save(media.path().join("a.png"))
            .unwrap();
        DynamicImage::new_rgb8(64, 32)
            .save(media.path().join("b.png"))
            .unwrap();
        fs::write(media.path().join("c.mp4"), b"video").unwrap();
        fs::write(media.path().join("readme.txt"), b"skip").unwrap();

        let config = Config::default()
            .data_dir(data.path())
            .frames_per_thumbnail(2)
            .workers(1)
            .thumb_width(32);
        let app = App::with_backend(config, Arc::new(FakeBackend::new(50, 25.0))).unwrap();
        Fixture {
            _data: data,
            media,
            app,
        }
    }

    impl Fixture {
        fn path(&self, name: &str) -> PathBuf {
            self.media.path().join(name)
        }
    }

    #[test]
    fn test_choose_folder_scans_and_remembers() {
        let mut fx = fixture();
        let dir = fx.media.path().to_path_buf();
        fx.app.choose_folder(&dir).unwrap();

        assert_eq!(
            fx.app.files(),
            &[fx.path("a.png"), fx.path("b.png"), fx.path("c.mp4")]
        );
        assert_eq!(fx.app.filtered_files(), fx.app.files());
        assert_eq!(fx.app.store().last_folder(), Some(dir.as_path()));

        fx.app.wait_thumbnails(Duration::from_secs(5));
        let progress = fx.app.thumbnails().progress();
        assert_eq!((progress.completed, progress.total), (3, 3));

        let cycler = fx.app.thumbnail_cycler(&fx.path("c.mp4")).unwrap();
        assert_eq!(cycler.frames().len(), 2);
        assert_eq!(cycler.index_at(Duration::from_millis(111)), 1);
        assert_eq!(cycler.index_at(Duration::from_millis(222)), 0);
        assert!(fx.app.thumbnail_cycler(&fx.path("readme.txt")).is_none());
        fx.app.shutdown();
    }

    #[test]
    fn test_listing_without_thumbnail_passes() {
        let mut fx = fixture();
        let dir = fx.media.path().to_path_buf();
        fx.app.set_auto_thumbnails(false);
        fx.app.choose_folder(&dir).unwrap();
        fx.app.select_tags(["missing"]);
        fx.app.set_untagged_only(true);

        assert_eq!(fx.app.filtered_files().len(), 3);
        assert_eq!(fx.app.thumbnails().progress().total, 0);
        assert_eq!(fx.app.thumbnails().state(&fx.path("a.png")), None);

        fx.app.refresh_thumbnails();
        fx.app.wait_thumbnails(Duration::from_secs(5));
        let progress = fx.app.thumbnails().progress();
        assert_eq!((progress.completed, progress.total), (3, 3));
        fx.app.shutdown();
    }

    #[test]
    fn test_restore_last_folder() {
        let mut fx = fixture();
        assert!(!fx.app.restore_last_folder().unwrap());

        let dir = fx.media.path().to_path_buf();
        fx.app.choose_folder(&dir).unwrap();
        let config = fx.app.config().clone();
        fx.app.shutdown();

        let mut app = App::with_backend(config, Arc::new(FakeBackend::new(50, 25.0))).unwrap();
        assert!(app.restore_last_folder().unwrap());
        assert_eq!(app.files().len(), 3);
        app.shutdown();
    }

    #[test]
    fn test_tag_filtering() {
        let mut fx = fixture();
        fx.app.load_folder(&fx.media.path().to_path_buf()).unwrap();
        let (a, b, c) = (fx.path("a.png"), fx.path("b.png"), fx.path("c.mp4"));

        fx.app.set_tags(&a, "Beach sunset");
        fx.app.add_tag(&c, "beach");
        assert_eq!(fx.app.tag_names(), vec!["beach", "sunset"]);
        assert_eq!(fx.app.tag_frequencies()["beach"], 2);

        fx.app.select_tags(["SUNSET"]);
        assert_eq!(fx.app.filtered_files(), &[a.clone()]);

        fx.app.select_tags(["beach", "sunset"]);
        assert_eq!(fx.app.filtered_files(), &[a.clone(), c.clone()]);

        fx.app.set_untagged_only(true);
        assert_eq!(fx.app.filtered_files(), &[b.clone()]);

        fx.app.set_untagged_only(false);
        fx.app.select_tags(Vec::<String>::new());
        assert_eq!(fx.app.filtered_files(), &[a, b, c]);
        fx.app.shutdown();
    }

    #[test]
    fn test_add_tag_is_idempotent() {
        let mut fx = fixture();
        let a = fx.path("a.png");
        assert_eq!(fx.app.add_tag(&a, " Cat ").to_string(), "cat");
        assert_eq!(fx.app.add_tag(&a, "cat").to_string(), "cat");
        assert_eq!(fx.app.add_tag(&a, "  ").to_string(), "cat");
        assert_eq!(fx.app.add_tag(&a, "dog").to_string(), "cat dog");
        fx.app.shutdown();
    }

    #[test]
    fn test_invalid_width_leaves_state() {
        let mut fx = fixture();
        assert_eq!(
            fx.app.set_thumbnail_width("10"),
            Err(ValidationError::WidthOutOfRange(10))
        );
        assert_eq!(
            fx.app.set_thumbnail_width("wide"),
            Err(ValidationError::NotANumber("wide".to_string()))
        );
        assert_eq!(fx.app.thumbnail_width(), 32);
        assert_eq!(fx.app.set_thumbnail_width(" 120 "), Ok(120));
        assert_eq!(fx.app.thumbnail_width(), 120);
        fx.app.shutdown();
    }

    #[test]
    fn test_video_range_validation_and_invalidation() {
        let mut fx = fixture();
        fx.app.load_folder(&fx.media.path().to_path_buf()).unwrap();
        fx.app.wait_thumbnails(Duration::from_secs(5));
        let c = fx.path("c.mp4");
        assert!(fx.app.thumbnails().cache().is_cached(&c));

        assert_eq!(
            fx.app.set_video_range(&c, "5", "5"),
            Err(ValidationError::EmptyRange { start: 5.0, end: 5.0 })
        );
        assert!(fx.app.set_video_range(&c, "x", "5").is_err());
        assert!(fx.app.store().video_range(&c).is_none());
        assert!(fx.app.thumbnails().cache().is_cached(&c));

        let range = fx.app.set_video_range(&c, "0.5", "1.5").unwrap();
        assert_eq!(fx.app.store().video_range(&c), Some(range));
        assert_eq!(fx.app.thumbnails().state(&c), Some(ThumbnailState::Dispatched));

        fx.app.wait_thumbnails(Duration::from_secs(5));
        assert_eq!(fx.app.thumbnails().state(&c), Some(ThumbnailState::Completed));
        assert!(fx.app.thumbnails().cache().is_cached(&c));

        fx.app.select_media(&c);
        assert_eq!(fx.app.range_seek(1.6, false), Some(0.5));
        assert_eq!(fx.app.range_seek(1.6, true), None);
        fx.app.shutdown();
    }

    #[test]
    fn test_select_media_details() {
        let mut fx = fixture();
        let c = fx.path("c.mp4");
        let details = fx.app.select_media(&c);
        assert_eq!(details.volume, DEFAULT_VOLUME);
        assert!(details.range.is_none());
        assert!(details.tags.is_empty());

        fx.app.set_volume(&c, 70);
        fx.app.set_tags(&c, "clip");
        let details = fx.app.select_media(&c);
        assert_eq!(details.volume, 70);
        assert_eq!(details.tags.to_string(), "clip");
        assert_eq!(fx.app.current(), Some(c.as_path()));
        fx.app.shutdown();
    }

    #[test]
    fn test_delete_requires_confirmation_and_keeps_tags() {
        let mut fx = fixture();
        fx.app.load_folder(&fx.media.path().to_path_buf()).unwrap();
        let a = fx.path("a.png");
        fx.app.set_tags(&a, "keep");
        fx.app.select_media(&a);

        let err = fx.app.delete_media(&a, |_| false).unwrap_err();
        assert!(matches!(err, DeleteError::NotConfirmed(_)));
        assert!(a.exists());

        fx.app.delete_media(&a, |_| true).unwrap();
        assert!(!a.exists());
        assert!(!fx.app.files().contains(&a));
        assert!(!fx.app.filtered_files().contains(&a));
        assert!(fx.app.current().is_none());

        let raw = fs::read_to_string(fx._data.path().join(TAGS_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[&*a.to_string_lossy()], "keep");
        assert!(!fx.app.tag_frequencies().contains_key("keep"));

        let err = fx.app.delete_media(&a, |_| true).unwrap_err();
        assert!(matches!(err, DeleteError::Io { .. }));
        fx.app.shutdown();
    }

    #[test]
    fn test_cleanup_duplicates() {
        let mut fx = fixture();
        fs::copy(fx.path("a.png"), fx.path("d.png")).unwrap();
        fx.app.load_folder(&fx.media.path().to_path_buf()).unwrap();
        assert_eq!(fx.app.files().len(), 4);

        // a.png and b.png are identical blank images too.
        assert_eq!(fx.app.cleanup_duplicates(), 2);
        assert_eq!(fx.app.files(), &[fx.path("a.png"), fx.path("c.mp4")]);
        assert!(!fx.path("d.png").exists());
        assert_eq!(fx.app.cleanup_duplicates(), 0);
        fx.app.shutdown();
    }

    #[test]
    fn test_random_media_and_slideshow() {
        let mut fx = fixture();
        fx.app.load_folder(&fx.media.path().to_path_buf()).unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        let first = fx.app.random_media(&mut rng).unwrap();
        let second = fx.app.random_media(&mut rng).unwrap();
        assert_ne!(first, second);

        assert!(fx.app.start_slideshow("-1").is_err());
        fx.app.select_tags(["nothing"]);
        assert_eq!(
            fx.app.start_slideshow("3").unwrap_err(),
            ValidationError::NoSelection
        );
        fx.app.select_tags(Vec::<String>::new());
        let show = fx.app.start_slideshow("3").unwrap();
        assert_eq!(show.files().len(), 3);
        fx.app.shutdown();
    }
}
