// src/infrastructure/frame_cache.rs
//
// Content-addressed frame cache keyed by (media_id, frame_index)
//
// Entries are evictable at any time. Reads may run concurrently; the last
// writer wins.

use image::RgbImage;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub media_id: i64,
    pub frame_index: u64,
}

impl FrameKey {
    pub fn new(media_id: i64, frame_index: u64) -> Self {
        Self {
            media_id,
            frame_index,
        }
    }

    fn file_name(&self) -> String {
        format!("{}_{}.png", self.media_id, self.frame_index)
    }
}

pub trait FrameCache: Send + Sync {
    fn get(&self, key: &FrameKey) -> Option<RgbImage>;
    fn put(&self, key: FrameKey, frame: &RgbImage) -> AppResult<()>;
    fn evict(&self, key: &FrameKey);
}

// ============================================================================
// IN-MEMORY
// ============================================================================

struct MemoryInner {
    frames: HashMap<FrameKey, RgbImage>,
    order: VecDeque<FrameKey>,
}

/// Bounded in-memory cache; the oldest insert is evicted first
pub struct MemoryFrameCache {
    capacity: usize,
    inner: RwLock<MemoryInner>,
}

impl MemoryFrameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(MemoryInner {
                frames: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameCache for MemoryFrameCache {
    fn get(&self, key: &FrameKey) -> Option<RgbImage> {
        self.inner.read().ok()?.frames.get(key).cloned()
    }

    fn put(&self, key: FrameKey, frame: &RgbImage) -> AppResult<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| AppError::Other("Frame cache lock poisoned".to_string()))?;

        if inner.frames.insert(key, frame.clone()).is_none() {
            inner.order.push_back(key);
        }

        while inner.frames.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.frames.remove(&oldest);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn evict(&self, key: &FrameKey) {
        if let Ok(mut inner) = self.inner.write() {
            inner.frames.remove(key);
            inner.order.retain(|k| k != key);
        }
    }
}

// ============================================================================
// ON-DISK
// ============================================================================

/// PNG files in a directory; writes go through a temp file and a rename
pub struct DiskFrameCache {
    dir: PathBuf,
}

impl DiskFrameCache {
    pub fn new(dir: PathBuf) -> AppResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl FrameCache for DiskFrameCache {
    fn get(&self, key: &FrameKey) -> Option<RgbImage> {
        let path = self.dir.join(key.file_name());
        if !path.exists() {
            return None;
        }
        match image::open(&path) {
            Ok(img) => Some(img.to_rgb8()),
            Err(e) => {
                log::warn!("Dropping unreadable cached frame {}: {}", path.display(), e);
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    fn put(&self, key: FrameKey, frame: &RgbImage) -> AppResult<()> {
        let final_path = self.dir.join(key.file_name());
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", key.file_name(), uuid::Uuid::new_v4()));

        frame.save_with_format(&temp_path, image::ImageFormat::Png)?;
        std::fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    fn evict(&self, key: &FrameKey) {
        let _ = std::fs::remove_file(self.dir.join(key.file_name()));
    }
}
