use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" => Some(Self::Image),
            "mp4" | "mov" | "avi" | "mkv" => Some(Self::Video),
            _ => None,
        }
    }

    /// Classify a path by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn is_video(&self) -> bool {
        *self == MediaType::Video
    }
}

/// Check whether a path points at a supported video file.
pub fn is_video_path(path: &Path) -> bool {
    MediaType::from_path(path).map_or(false, |t| t.is_video())
}
