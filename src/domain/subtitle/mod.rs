pub mod entity;
pub mod invariants;

pub use entity::{normalize_text, SubtitleCue};
pub use invariants::validate_cue;
