//! JSON-backed persistence for per-media settings.
//!
//! This module provides the `MediaStore` struct which owns four independent
//! documents inside the data directory:
//! - `settings.json`: the last opened folder
//! - `volume_settings.json`: playback volume per media path
//! - `video_ranges.json`: playback window per video path
//! - `media_tags.json`: space-joined tag string per media path
//!
//! Loading is best-effort: a missing or malformed document yields an empty
//! default. Every mutation rewrites the whole document. The tag document goes
//! through a temporary file and an atomic rename; the others are written in
//! place.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::models::VideoRange;
use crate::tags::{TagMap, TagSet};

pub const SETTINGS_FILE: &str = "settings.json";
pub const VOLUME_FILE: &str = "volume_settings.json";
pub const RANGES_FILE: &str = "video_ranges.json";
pub const TAGS_FILE: &str = "media_tags.json";

/// Volume used for media without a stored setting.
pub const DEFAULT_VOLUME: u8 = 50;

/// Largest storable volume.
pub const MAX_VOLUME: u8 = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_folder: Option<PathBuf>,
}

/// Persistent per-media settings for the browser.
pub struct MediaStore {
    dir: PathBuf,
    settings: Settings,
    volumes: BTreeMap<PathBuf, u8>,
    ranges: BTreeMap<PathBuf, VideoRange>,
    tags: TagMap,
}

impl MediaStore {
    /// Load all four documents from `dir`.
    ///
    /// Never fails: unreadable documents are logged and replaced by empty
    /// defaults.
    pub fn open(dir: &Path) -> Self {
        let store = Self {
            dir: dir.to_path_buf(),
            settings: load_document(&dir.join(SETTINGS_FILE)),
            volumes: load_document(&dir.join(VOLUME_FILE)),
            ranges: load_document(&dir.join(RANGES_FILE)),
            tags: load_document(&dir.join(TAGS_FILE)),
        };

        info!(
            ?dir,
            volumes = store.volumes.len(),
            ranges = store.ranges.len(),
            tags = store.tags.len(),
            "Opened media store"
        );
        store
    }

    /// Directory holding the documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // =========================================================================
    // Last folder
    // =========================================================================

    pub fn last_folder(&self) -> Option<&Path> {
        self.settings.last_folder.as_deref()
    }

    pub fn set_last_folder(&mut self, folder: &Path) -> Result<()> {
        self.settings.last_folder = Some(document_key(folder)?);
        save_document(&self.dir.join(SETTINGS_FILE), &self.settings)
    }

    // =========================================================================
    // Volume
    // =========================================================================

    /// Stored volume for `path`, or [`DEFAULT_VOLUME`].
    pub fn volume(&self, path: &Path) -> u8 {
        self.volumes
            .get(path)
            .map(|v| (*v).min(MAX_VOLUME))
            .unwrap_or(DEFAULT_VOLUME)
    }

    pub fn set_volume(&mut self, path: &Path, volume: u8) -> Result<()> {
        self.volumes.insert(document_key(path)?, volume.min(MAX_VOLUME));
        save_document(&self.dir.join(VOLUME_FILE), &self.volumes)
    }

    // =========================================================================
    // Video ranges
    // =========================================================================

    /// Playback window for `path`. Invalid stored ranges read as unset.
    pub fn video_range(&self, path: &Path) -> Option<VideoRange> {
        self.ranges.get(path).copied().filter(VideoRange::is_valid)
    }

    pub fn set_video_range(&mut self, path: &Path, range: VideoRange) -> Result<()> {
        self.ranges.insert(document_key(path)?, range);
        save_document(&self.dir.join(RANGES_FILE), &self.ranges)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// All stored tag strings, including paths outside the current folder.
    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    pub fn tag_set(&self, path: &Path) -> TagSet {
        crate::tags::tags_for(&self.tags, path)
    }

    /// Replace the tags of `path` with the normalized `tags`.
    pub fn set_tags(&mut self, path: &Path, tags: &TagSet) -> Result<()> {
        self.tags.insert(document_key(path)?, tags.to_string());
        debug!(?path, tags = %tags, "Set tags");
        save_document_atomic(&self.dir.join(TAGS_FILE), &self.tags)
    }

    /// Re-read the tag document from disk.
    pub fn reload_tags(&mut self) {
        self.tags = load_document(&self.dir.join(TAGS_FILE));
    }
}

/// JSON object keys must be text, so paths that are not UTF-8 cannot be
/// stored. They are rejected before they reach the in-memory maps.
fn document_key(path: &Path) -> Result<PathBuf> {
    if path.to_str().is_none() {
        bail!("Cannot store settings for non UTF-8 path {:?}", path);
    }
    Ok(path.to_path_buf())
}

/// Read a JSON document, falling back to the default on any failure.
fn load_document<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    match read_document(path) {
        Ok(value) => value,
        Err(e) => {
            warn!(?path, error = ?e, "Failed to load document, using defaults");
            T::default()
        }
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse {:?}", path))
}

/// Overwrite a JSON document in place.
fn save_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to write {:?}", path))?;
    writer.flush()?;
    Ok(())
}

/// Write a JSON document to a sibling temp file, then rename it over `path`.
fn save_document_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to write temp file for {:?}", path))?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}
