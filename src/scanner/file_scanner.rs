//! File scanner for a single media folder.
//!
//! This module provides:
//! - Non-recursive listing of supported media files using walkdir
//! - Duplicate detection by file size, then SHA-256 of the contents

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::models::MediaType;

/// List the supported media files directly inside `dir`, sorted by path.
///
/// Subdirectories are not entered. Fails if `dir` itself cannot be read.
pub fn scan_folder(dir: &Path) -> Result<Vec<PathBuf>> {
    info!("Starting scan of {:?}", dir);

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e).with_context(|| format!("Failed to read folder {:?}", dir));
            }
            Err(e) => {
                warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                continue;
            }
        };

        if !entry.file_type().is_file() && !entry.path().is_file() {
            continue;
        }
        if MediaType::from_path(entry.path()).is_none() {
            trace!(path = ?entry.path(), "Skipping non-media file");
            continue;
        }
        files.push(entry.into_path());
    }

    // Sort by path for consistent ordering
    files.sort();

    info!("Discovered {} media files", files.len());
    Ok(files)
}

/// Files whose contents repeat an earlier file in `files`.
///
/// The first file with given contents is kept; every later identical file is
/// returned, in list order. Only files sharing a size are hashed. Unreadable
/// files are skipped.
pub fn find_duplicates(files: &[PathBuf]) -> Vec<PathBuf> {
    let sizes: Vec<Option<u64>> = files
        .iter()
        .map(|path| match std::fs::metadata(path) {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                warn!(?path, error = ?e, "Failed to read file size");
                None
            }
        })
        .collect();

    let mut per_size: HashMap<u64, usize> = HashMap::new();
    for size in sizes.iter().flatten() {
        *per_size.entry(*size).or_insert(0) += 1;
    }

    let mut seen: HashSet<(u64, String)> = HashSet::new();
    let mut duplicates = Vec::new();

    for (path, size) in files.iter().zip(sizes) {
        let Some(size) = size else { continue };
        if per_size.get(&size).copied().unwrap_or(0) < 2 {
            continue;
        }

        let hash = match hash_file(path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(?path, error = ?e, "Failed to hash file");
                continue;
            }
        };

        if !seen.insert((size, hash)) {
            debug!(?path, "Found duplicate");
            duplicates.push(path.clone());
        }
    }

    duplicates
}

/// Lowercase hex SHA-256 of a file's contents.
fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_scan_empty_dir() {
        let dir = tempdir().unwrap();
        assert!(scan_folder(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["b.mp4", "a.JPG", "c.png", "notes.txt", "clip.webm", "d.mkv"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let files = scan_folder(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.mp4", "c.png", "d.mkv"]);
    }

    #[test]
    fn test_scan_is_not_recursive() {
        let dir = tempdir().unwrap();
        let subdir = dir.path().join("nested.jpg");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("inner.png"), b"x").unwrap();
        fs::write(dir.path().join("root.png"), b"x").unwrap();

        let files = scan_folder(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("root.png")]);
    }

    #[test]
    fn test_scan_missing_dir_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(scan_folder(&dir.path().join("gone")).is_err());
    }

    #[test]
    fn test_find_duplicates_keeps_first() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        let c = dir.path().join("c.jpg");
        let d = dir.path().join("d.jpg");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"diff bytes").unwrap(); // same size, other content
        fs::write(&c, b"same bytes").unwrap();
        fs::write(&d, b"same bytes").unwrap();

        let files = vec![a, b, c.clone(), d.clone()];
        assert_eq!(find_duplicates(&files), vec![c, d]);
    }

    #[test]
    fn test_find_duplicates_skips_missing() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        fs::write(&a, b"one").unwrap();
        let files = vec![a, dir.path().join("missing.jpg")];
        assert!(find_duplicates(&files).is_empty());
    }
}
