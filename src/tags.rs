//! Tag normalization, frequency counts and tag-based filtering.
//!
//! Tags are stored per media path as a single space-joined string. All
//! functions here are pure over that map and the current file list; the map
//! itself keeps entries for files that are no longer listed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Persisted tag strings keyed by media path.
pub type TagMap = BTreeMap<PathBuf, String>;

/// A normalized set of tag tokens: lowercase, no whitespace, sorted, unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whitespace-delimited tag string.
    pub fn parse(input: &str) -> Self {
        Self::from_tokens(input.split_whitespace())
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for token in tokens {
            set.insert(token.as_ref());
        }
        set
    }

    /// Add every whitespace-separated token of `token`. Returns true if the
    /// set changed.
    pub fn insert(&mut self, token: &str) -> bool {
        let mut changed = false;
        for part in token.split_whitespace() {
            changed |= self.0.insert(part.to_lowercase());
        }
        changed
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(&token.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// True if at least one token is in `selected`.
    pub fn intersects(&self, selected: &BTreeSet<String>) -> bool {
        self.0.iter().any(|tag| selected.contains(tag))
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(tag)?;
        }
        Ok(())
    }
}

/// Tags of a single path, empty when the path has no entry.
pub fn tags_for(tags: &TagMap, path: &Path) -> TagSet {
    tags.get(path).map(|s| TagSet::parse(s)).unwrap_or_default()
}

/// Count how many listed files carry each tag, sorted by tag name.
///
/// Entries for paths outside `files` are ignored.
pub fn tag_frequencies(files: &[PathBuf], tags: &TagMap) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for path in files {
        for tag in tags_for(tags, path).iter() {
            *counts.entry(tag.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Files carrying at least one of the selected tags, in list order.
///
/// An empty selection returns the list unchanged.
pub fn filter_by_tags(
    files: &[PathBuf],
    tags: &TagMap,
    selected: &BTreeSet<String>,
) -> Vec<PathBuf> {
    if selected.is_empty() {
        return files.to_vec();
    }
    files
        .iter()
        .filter(|path| tags_for(tags, path).intersects(selected))
        .cloned()
        .collect()
}

/// Files without an entry or with a blank tag string.
pub fn filter_untagged(files: &[PathBuf], tags: &TagMap) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|path| tags.get(*path).map_or(true, |s| s.trim().is_empty()))
        .cloned()
        .collect()
}
