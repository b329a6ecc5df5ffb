//! Core of a local image and video browser.
//!
//! Folder scanning, per-media settings, tag filtering, the thumbnail
//! pipeline and slideshow planning. Rendering and playback are left to the
//! front end behind [`slideshow::DisplaySurface`] and
//! [`thumbnails::ThumbnailEvent`].

pub mod app;
pub mod config;
pub mod error;
pub mod models;
pub mod scanner;
pub mod slideshow;
pub mod tags;
pub mod thumbnails;
pub mod video;

pub use app::App;
pub use config::Config;
