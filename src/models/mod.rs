pub mod media_item;
pub mod media_store;
pub mod video_range;

pub use media_item::*;
pub use media_store::*;
pub use video_range::*;
