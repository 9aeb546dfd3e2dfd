pub mod entity;
pub mod invariants;

pub use entity::{parse_episode_designator, MediaItem, MediaKind, MediaMetadata};
pub use invariants::validate_media_item;
