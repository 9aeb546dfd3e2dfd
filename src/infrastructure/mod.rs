// src/infrastructure/mod.rs
//
// Infrastructure Layer
//
// Contains implementation details that support the domain
// but are not part of the domain itself.
//
// RULES:
// - Infrastructure serves the domain
// - Infrastructure never dictates domain behavior
// - Infrastructure is replaceable

pub mod frame_cache;
pub mod frame_extractor;
pub mod frame_source;
pub mod fuzzy;

pub use frame_cache::{DiskFrameCache, FrameCache, FrameKey, MemoryFrameCache};
pub use frame_extractor::{fix_dar, format_millis, trim_borders, FrameExtractor};
pub use frame_source::{FfmpegFrameSource, FrameSource, VideoInfo};
