// src/integrations/cache.rs
//
// On-disk response cache shared by the HTTP clients
//
// Entries are keyed by the SHA-256 of the request URL and expire after a TTL
// measured from the file's modification time.

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::error::AppResult;

pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(dir: PathBuf, ttl: Duration) -> AppResult<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, ttl })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.dir.join(format!("{}.json", hex))
    }

    /// Cached body, if present and younger than the TTL
    pub fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.ttl {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        std::fs::read_to_string(&path).ok()
    }

    pub fn put(&self, key: &str, body: &str) -> AppResult<()> {
        let path = self.path_for(key);
        let temp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&temp, body)?;
        std::fs::rename(&temp, &path)?;
        Ok(())
    }
}
