//! Thumbnail caching with both disk and memory layers.
//!
//! - Disk cache: one JPEG per frame in `<data_dir>/.thumbcache/`
//! - Memory cache: LRU of realized frame sets keyed by media path
//!
//! Frame files are named `<sha256(path)>_<index>.jpg`. The key depends only on
//! the path, so edits to the media file are picked up through explicit
//! invalidation, not by the key changing.

use std::fs::File;
use std::io::BufWriter;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use super::FrameSet;
use crate::config::{Config, DEFAULT_MEMORY_ENTRIES};

/// Cache key for a media path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Lowercase hex SHA-256 of the path's raw bytes (its UTF-8 text when it
    /// has one).
    hash: String,
}

impl CacheKey {
    pub fn new(path: &Path) -> Self {
        let digest = Sha256::digest(path.as_os_str().as_encoded_bytes());
        Self {
            hash: hex::encode(digest),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Filename of frame `index` on disk.
    pub fn frame_filename(&self, index: usize) -> String {
        format!("{}_{}.jpg", self.hash, index)
    }
}

/// The frame files making up one cached thumbnail, in frame order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFileSet {
    files: Vec<PathBuf>,
}

impl CacheFileSet {
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// True when every frame file is present.
    pub fn all_exist(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.is_file())
    }

    /// Delete whichever frame files exist. Returns how many were removed.
    pub fn remove_all(&self) -> usize {
        let mut removed = 0;
        for file in &self.files {
            if !file.exists() {
                continue;
            }
            match std::fs::remove_file(file) {
                Ok(()) => removed += 1,
                Err(e) => warn!(?file, error = ?e, "Failed to remove cached frame"),
            }
        }
        removed
    }
}

/// Thumbnail cache with disk and memory layers.
#[derive(Clone)]
pub struct ThumbnailCache {
    /// Directory for frame files.
    cache_dir: PathBuf,
    /// Frame files expected per video.
    frames_per_thumbnail: usize,
    /// JPEG quality for stored frames.
    jpeg_quality: u8,
    /// Realized frame sets, shared between clones.
    memory: Arc<Mutex<LruCache<PathBuf, FrameSet>>>,
}

impl ThumbnailCache {
    /// Create a cache rooted at `cache_dir`, creating the directory if needed.
    pub fn new(
        cache_dir: PathBuf,
        frames_per_thumbnail: usize,
        jpeg_quality: u8,
        memory_entries: usize,
    ) -> Self {
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            warn!(?cache_dir, error = ?e, "Failed to create cache directory");
        }

        let capacity = NonZeroUsize::new(memory_entries)
            .or(NonZeroUsize::new(DEFAULT_MEMORY_ENTRIES))
            .unwrap_or(NonZeroUsize::MIN);

        debug!(?cache_dir, frames_per_thumbnail, "Initialized thumbnail cache");

        Self {
            cache_dir,
            frames_per_thumbnail: frames_per_thumbnail.max(1),
            jpeg_quality: jpeg_quality.clamp(1, 100),
            memory: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.cache_dir(),
            config.frames_per_thumbnail,
            config.jpeg_quality,
            config.memory_entries,
        )
    }

    /// Frame files for `path`, whether or not they exist yet.
    pub fn resolve(&self, path: &Path) -> CacheFileSet {
        let key = CacheKey::new(path);
        let files = (0..self.frames_per_thumbnail)
            .map(|i| self.cache_dir.join(key.frame_filename(i)))
            .collect();
        CacheFileSet { files }
    }

    /// True when every frame file of `path` exists on disk.
    pub fn is_cached(&self, path: &Path) -> bool {
        self.resolve(path).all_exist()
    }

    /// Decode every frame file of the set.
    ///
    /// Returns `None` if any file is missing, fails to decode, or decodes to
    /// an empty image.
    pub fn load_cached(&self, files: &CacheFileSet) -> Option<FrameSet> {
        let mut frames = Vec::with_capacity(files.len());
        for file in files.files() {
            let img = match image::open(file) {
                Ok(img) => img,
                Err(e) => {
                    trace!(?file, error = %e, "Cached frame unreadable");
                    return None;
                }
            };
            let (width, height) = img.dimensions();
            if width == 0 || height == 0 {
                return None;
            }
            frames.push(img);
        }
        FrameSet::new(frames)
    }

    /// Write `frames` as JPEG over the first files of the set.
    ///
    /// Returns the number of files written. Extra frames beyond the file
    /// count are ignored.
    pub fn store_frames(&self, files: &CacheFileSet, frames: &FrameSet) -> Result<usize> {
        let mut written = 0;
        for (file, frame) in files.files().iter().zip(frames.frames()) {
            self.write_jpeg(file, frame)?;
            written += 1;
        }
        debug!(written, "Stored thumbnail frames");
        Ok(written)
    }

    fn write_jpeg(&self, file: &Path, frame: &DynamicImage) -> Result<()> {
        let out = File::create(file).with_context(|| format!("Failed to create {:?}", file))?;
        let mut writer = BufWriter::new(out);
        let encoder = JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
        frame
            .to_rgb8()
            .write_with_encoder(encoder)
            .with_context(|| format!("Failed to encode {:?}", file))?;
        Ok(())
    }

    /// Drop both layers for `path`. Returns the number of files deleted.
    pub fn invalidate(&self, path: &Path) -> usize {
        self.memory.lock().pop(path);
        let removed = self.resolve(path).remove_all();
        debug!(?path, removed, "Invalidated thumbnail");
        removed
    }

    pub fn remember(&self, path: &Path, frames: FrameSet) {
        self.memory.lock().put(path.to_path_buf(), frames);
    }

    pub fn get_from_memory(&self, path: &Path) -> Option<FrameSet> {
        self.memory.lock().get(path).cloned()
    }

    pub fn clear_memory(&self) {
        self.memory.lock().clear();
        debug!("Cleared memory cache");
    }

    pub fn memory_entry_count(&self) -> usize {
        self.memory.lock().len()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn frames_per_thumbnail(&self) -> usize {
        self.frames_per_thumbnail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn frames(count: usize) -> FrameSet {
        FrameSet::new(
            (0..count)
                .map(|_| DynamicImage::new_rgb8(40, 30))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_cache_key_is_sha256_of_path() {
        let key = CacheKey::new(Path::new("/m/a.mp4"));
        assert_eq!(key.hash().len(), 64);
        assert!(key.hash().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(key, CacheKey::new(Path::new("/m/a.mp4")));
        assert_ne!(key, CacheKey::new(Path::new("/m/b.mp4")));
        assert_eq!(key.frame_filename(3), format!("{}_3.jpg", key.hash()));
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        let key = CacheKey::new(Path::new("abc"));
        assert_eq!(
            key.hash(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_key_distinguishes_non_utf8_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let a = CacheKey::new(Path::new(OsStr::from_bytes(b"/m/\xff.mp4")));
        let b = CacheKey::new(Path::new(OsStr::from_bytes(b"/m/\xfe.mp4")));
        assert_ne!(a, b);

        // Valid UTF-8 paths hash their text, so existing cache files still match.
        let text = CacheKey::new(Path::new(OsStr::from_bytes(b"abc")));
        assert_eq!(text, CacheKey::new(Path::new("abc")));
    }

    #[test]
    fn test_resolve_names_every_frame() {
        let dir = tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join(".thumbcache"), 3, 85, 8);
        assert!(dir.path().join(".thumbcache").is_dir());

        let files = cache.resolve(Path::new("/m/a.mp4"));
        assert_eq!(files.len(), 3);
        let hash = CacheKey::new(Path::new("/m/a.mp4")).hash().to_string();
        for (i, file) in files.files().iter().enumerate() {
            assert_eq!(file.parent(), Some(cache.cache_dir()));
            assert_eq!(
                file.file_name().unwrap().to_string_lossy(),
                format!("{}_{}.jpg", hash, i)
            );
        }
        assert!(!files.all_exist());
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().to_path_buf(), 3, 85, 8);
        let files = cache.resolve(Path::new("/m/a.mp4"));

        assert_eq!(cache.store_frames(&files, &frames(3)).unwrap(), 3);
        assert!(cache.is_cached(Path::new("/m/a.mp4")));

        let loaded = cache.load_cached(&files).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.first().dimensions(), (40, 30));
    }

    #[test]
    fn test_partial_set_is_not_cached() {
        let dir = tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().to_path_buf(), 3, 85, 8);
        let files = cache.resolve(Path::new("/m/a.mp4"));

        // Decoder yielded fewer frames than the configured count.
        assert_eq!(cache.store_frames(&files, &frames(2)).unwrap(), 2);
        assert!(!files.all_exist());
        assert!(cache.load_cached(&files).is_none());
    }

    #[test]
    fn test_corrupt_frame_fails_load() {
        let dir = tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().to_path_buf(), 2, 85, 8);
        let files = cache.resolve(Path::new("/m/a.mp4"));
        cache.store_frames(&files, &frames(2)).unwrap();
        std::fs::write(&files.files()[1], b"garbage").unwrap();

        assert!(files.all_exist());
        assert!(cache.load_cached(&files).is_none());
    }

    #[test]
    fn test_invalidate_removes_both_layers() {
        let dir = tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().to_path_buf(), 2, 85, 8);
        let path = Path::new("/m/a.mp4");
        let files = cache.resolve(path);
        cache.store_frames(&files, &frames(2)).unwrap();
        cache.remember(path, frames(2));

        assert_eq!(cache.invalidate(path), 2);
        assert!(cache.get_from_memory(path).is_none());
        assert!(files.files().iter().all(|f| !f.exists()));
        assert_eq!(cache.invalidate(path), 0);
    }

    #[test]
    fn test_memory_layer_is_shared_and_bounded() {
        let dir = tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().to_path_buf(), 1, 85, 2);
        let clone = cache.clone();

        cache.remember(Path::new("/m/a.jpg"), frames(1));
        cache.remember(Path::new("/m/b.jpg"), frames(1));
        cache.remember(Path::new("/m/c.jpg"), frames(1));

        assert_eq!(clone.memory_entry_count(), 2);
        assert!(clone.get_from_memory(Path::new("/m/a.jpg")).is_none());
        assert!(clone.get_from_memory(Path::new("/m/c.jpg")).is_some());

        clone.clear_memory();
        assert_eq!(cache.memory_entry_count(), 0);
    }
}
