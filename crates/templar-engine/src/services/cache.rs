//! File-backed service cache
//!
//! Memoizes pure functions of their arguments (notably the InterPro domain
//! scan, which takes minutes per sequence). One JSON file per key carries
//! the value and its write timestamp; entries expire after a configured
//! lifetime. Writers take a short-lived per-key lock; when the lock cannot
//! be obtained in time, readers fall back to a best-effort read and callers
//! compute without caching.

use crate::error::Result;
use crate::lock::PathLock;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    written_at: DateTime<Utc>,
    value: T,
}

pub struct FileCache {
    dir: PathBuf,
    expiration: Duration,
    lock_timeout: Duration,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>, expiration: Duration, lock_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            expiration,
            lock_timeout,
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn lock_file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("lock_{}", key))
    }

    /// Best-effort read of an unexpired entry.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.entry_path(key);
        let contents = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry<T> = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "dropping unreadable cache entry");
                let _ = std::fs::remove_file(&path);
                return None;
            },
        };

        let age = Utc::now().signed_duration_since(entry.written_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 > self.expiration.as_secs() {
            debug!(key = %key, "cache entry expired");
            return None;
        }
        Some(entry.value)
    }

    /// Write an entry with the current timestamp.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            written_at: Utc::now(),
            value,
        };
        let contents = serde_json::to_string(&entry).map_err(templar_common::CommonError::from)?;
        std::fs::write(self.entry_path(key), contents)?;
        Ok(())
    }

    /// Take the per-key lock; `None` when another holder kept it past the
    /// configured timeout.
    pub async fn lock_key(&self, key: &str) -> Result<Option<PathLock>> {
        std::fs::create_dir_all(&self.dir)?;
        PathLock::acquire_timeout(self.lock_file_path(key), self.lock_timeout).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
