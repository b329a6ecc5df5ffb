//! Folder listing and duplicate detection.

pub mod file_scanner;

pub use file_scanner::{find_duplicates, scan_folder};
