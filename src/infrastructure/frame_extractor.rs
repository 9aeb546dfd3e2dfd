// src/infrastructure/frame_extractor.rs
//
// Deterministic frame retrieval
//
// Per frame: decode at the requested millisecond, correct the display
// aspect ratio, trim uniform borders, then cache by (media_id, frame_index).
// Pixel work runs on the blocking pool.

use image::{imageops, imageops::FilterType, RgbImage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::frame_cache::{FrameCache, FrameKey};
use super::frame_source::{FrameSource, VideoInfo};
use crate::domain::MediaItem;
use crate::error::{AppError, AppResult};

/// Relative DAR mismatch tolerated before resizing
const DAR_TOLERANCE: f64 = 0.01;

/// Per-channel difference still considered part of a border
const BORDER_TOLERANCE: u8 = 16;

pub struct FrameExtractor {
    source: Arc<dyn FrameSource>,
    cache: Arc<dyn FrameCache>,
    probes: Mutex<HashMap<String, VideoInfo>>,
}

impl FrameExtractor {
    pub fn new(source: Arc<dyn FrameSource>, cache: Arc<dyn FrameCache>) -> Self {
        Self {
            source,
            cache,
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// Stream info, probed once per resource
    pub async fn video_info(&self, media: &MediaItem) -> AppResult<VideoInfo> {
        if let Some(info) = self
            .probes
            .lock()
            .ok()
            .and_then(|p| p.get(&media.resource).cloned())
        {
            return Ok(info);
        }

        let info = self.source.probe(&media.resource).await?;
        if let Ok(mut probes) = self.probes.lock() {
            probes.insert(media.resource.clone(), info.clone());
        }
        Ok(info)
    }

    pub async fn frame_at(&self, media: &MediaItem, millis: u64) -> AppResult<RgbImage> {
        let info = self.video_info(media).await?;
        self.frame_with_info(media, &info, millis).await
    }

    /// Frames from `start_ms` to `end_ms` every `step_frames` frames.
    pub async fn frames_in_range(
        &self,
        media: &MediaItem,
        start_ms: u64,
        end_ms: u64,
        step_frames: u32,
    ) -> AppResult<Vec<RgbImage>> {
        let info = self.video_info(media).await?;
        let step_ms = (info.frame_duration_ms() * step_frames.max(1) as f64).max(1.0);

        let mut frames = Vec::new();
        for step in 0u64.. {
            let position = start_ms + (step as f64 * step_ms).round() as u64;
            if position > end_ms {
                break;
            }
            frames.push(self.frame_with_info(media, &info, position).await?);
        }
        Ok(frames)
    }

    async fn frame_with_info(
        &self,
        media: &MediaItem,
        info: &VideoInfo,
        millis: u64,
    ) -> AppResult<RgbImage> {
        if info.duration_ms > 0 && millis > info.duration_ms {
            return Err(inexistent(media, millis));
        }

        let key = FrameKey::new(media.id, info.frame_index(millis));
        if let Some(frame) = self.cache.get(&key) {
            return Ok(frame);
        }

        let raw = self
            .source
            .decode_frame(&media.resource, millis)
            .await?
            .ok_or_else(|| inexistent(media, millis))?;

        // Resizing, trimming and the cache write stay off the async workers
        let dar = info.dar;
        let cache = Arc::clone(&self.cache);
        let frame = tokio::task::spawn_blocking(move || {
            let frame = trim_borders(&fix_dar(raw, dar), BORDER_TOLERANCE);
            if let Err(e) = cache.put(key, &frame) {
                log::warn!("Failed to cache frame {:?}: {}", key, e);
            }
            frame
        })
        .await?;
        Ok(frame)
    }
}

fn inexistent(media: &MediaItem, millis: u64) -> AppError {
    AppError::InexistentTimestamp(format!(
        "{} doesn't have a frame at {}",
        media.pretty_title(),
        format_millis(millis)
    ))
}

pub fn format_millis(millis: u64) -> String {
    let seconds = millis / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60,
        millis % 1000
    )
}

/// Resize width to `height * dar` when the stored pixel ratio disagrees
/// with the declared display ratio by more than 1%.
pub fn fix_dar(frame: RgbImage, dar: Option<f64>) -> RgbImage {
    let dar = match dar {
        Some(d) if d > 0.0 => d,
        _ => return frame,
    };

    let (width, height) = frame.dimensions();
    let pixel_ratio = width as f64 / height as f64;
    if ((pixel_ratio - dar) / dar).abs() <= DAR_TOLERANCE {
        return frame;
    }

    let new_width = (height as f64 * dar).round().max(1.0) as u32;
    imageops::resize(&frame, new_width, height, FilterType::Lanczos3)
}

/// Crop to the bounding box of pixels differing from the top-left pixel.
///
/// A frame that is uniform everywhere is returned unchanged.
pub fn trim_borders(frame: &RgbImage, tolerance: u8) -> RgbImage {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return frame.clone();
    }

    let reference = *frame.get_pixel(0, 0);
    let differs = |x: u32, y: u32| {
        let p = frame.get_pixel(x, y);
        p.0.iter()
            .zip(reference.0.iter())
            .any(|(a, b)| a.abs_diff(*b) > tolerance)
    };

    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for y in 0..height {
        for x in 0..width {
            if differs(x, y) {
                found = true;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }

    if !found {
        return frame.clone();
    }

    imageops::crop_imm(frame, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::MediaKind;
    use crate::infrastructure::frame_cache::MemoryFrameCache;
    use async_trait::async_trait;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Letterboxed gray frames whose red channel encodes the timestamp
    pub(crate) struct FakeSource {
        pub info: VideoInfo,
        pub decodes: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn new(width: u32, height: u32, duration_ms: u64, dar: Option<f64>) -> Self {
            Self {
                info: VideoInfo {
                    width,
                    height,
                    fps: 24.0,
                    duration_ms,
                    dar,
                },
                decodes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        async fn probe(&self, _resource: &str) -> AppResult<VideoInfo> {
            Ok(self.info.clone())
        }

        async fn decode_frame(&self, _resource: &str, millis: u64) -> AppResult<Option<RgbImage>> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            if millis > self.info.duration_ms {
                return Ok(None);
            }
            let bar = self.info.height / 8;
            let shade = 60 + ((millis / 1000) % 150) as u8;
            let frame = RgbImage::from_fn(self.info.width, self.info.height, |_, y| {
                if y < bar || y >= self.info.height - bar {
                    Rgb([0, 0, 0])
                } else {
                    Rgb([shade, 120, 120])
                }
            });
            Ok(Some(frame))
        }
    }

    fn media() -> MediaItem {
        let mut item = MediaItem::new(MediaKind::Movie, "Stalker".into(), "/m/stalker.mkv".into());
        item.id = 1;
        item
    }

    #[test]
    fn test_fix_dar_resizes_anamorphic() {
        let frame = RgbImage::new(720, 480);
        let fixed = fix_dar(frame, Some(16.0 / 9.0));
        assert_eq!(fixed.dimensions(), (853, 480));
    }

    #[test]
    fn test_fix_dar_within_tolerance_is_untouched() {
        let frame = RgbImage::new(1920, 1080);
        assert_eq!(fix_dar(frame, Some(1.7778)).dimensions(), (1920, 1080));
    }

    #[test]
    fn test_trim_borders() {
        let frame = RgbImage::from_fn(10, 10, |x, y| {
            if (2..8).contains(&x) && (3..7).contains(&y) {
                Rgb([200, 200, 200])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let trimmed = trim_borders(&frame, BORDER_TOLERANCE);
        assert_eq!(trimmed.dimensions(), (6, 4));
    }

    #[test]
    fn test_trim_uniform_frame_is_noop() {
        let frame = RgbImage::from_pixel(5, 5, Rgb([0, 0, 0]));
        assert_eq!(trim_borders(&frame, BORDER_TOLERANCE).dimensions(), (5, 5));
    }

    #[tokio::test]
    async fn test_frame_at_trims_and_caches() {
        let source = Arc::new(FakeSource::new(720, 480, 60_000, Some(16.0 / 9.0)));
        let cache = Arc::new(MemoryFrameCache::new(16));
        let extractor = FrameExtractor::new(source.clone(), cache);

        let frame = extractor.frame_at(&media(), 10_000).await.unwrap();
        assert_eq!(frame.dimensions(), (853, 360));

        // Same frame index comes from the cache
        extractor.frame_at(&media(), 10_010).await.unwrap();
        assert_eq!(source.decodes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_beyond_duration_is_inexistent() {
        let source = Arc::new(FakeSource::new(640, 360, 5_000, None));
        let extractor = FrameExtractor::new(source, Arc::new(MemoryFrameCache::new(4)));

        let err = extractor.frame_at(&media(), 6_000).await.unwrap_err();
        assert!(matches!(err, AppError::InexistentTimestamp(_)));
    }

    #[tokio::test]
    async fn test_range_steps_by_frames() {
        let source = Arc::new(FakeSource::new(640, 360, 60_000, None));
        let extractor = FrameExtractor::new(source, Arc::new(MemoryFrameCache::new(256)));

        // 1 second at 24 fps, every 4th frame: 0, 166.7, ..., 1000
        let frames = extractor.frames_in_range(&media(), 0, 1000, 4).await.unwrap();
        assert_eq!(frames.len(), 7);
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(784_220), "00:13:04.220");
    }
}
