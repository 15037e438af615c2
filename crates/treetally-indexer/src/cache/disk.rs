//! On-disk cache strategy.
//!
//! One file per key under a base directory, keyed by a truncated SHA-256
//! of the absolute path. Entries are written atomically (temp file +
//! rename) and encoded with MessagePack. A missing, corrupt, or
//! unreadable entry is a miss, never a failure.

use super::{AnalysisCache, CacheEntry, CacheStats, CacheStatsSnapshot};
use crate::analyzer::AnalysisPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cache whose entries survive process restarts.
#[derive(Debug)]
pub struct DiskCache {
    base_dir: PathBuf,
    stats: CacheStats,
}

impl DiskCache {
    /// Create a disk cache rooted at the given directory.
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            stats: CacheStats::default(),
        }
    }

    /// Create a disk cache under the platform data directory.
    pub fn with_default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("treetally")
            .join("cache");
        Self::new(base_dir)
    }

    /// Map a path key to a filesystem-safe identifier.
    pub fn key_for(&self, key: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.to_string_lossy().as_bytes());
        let result = hasher.finalize();
        format!("{:x}", result)[..16].to_string()
    }

    fn entry_path(&self, key: &Path) -> PathBuf {
        self.base_dir.join(format!("{}.bin", self.key_for(key)))
    }
}

#[async_trait]
impl AnalysisCache for DiskCache {
    async fn get(&self, key: &Path, modified_at: DateTime<Utc>) -> Option<AnalysisPayload> {
        let path = self.entry_path(key);

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.stats.record_miss();
                return None;
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read cache entry");
                self.stats.record_error();
                self.stats.record_miss();
                return None;
            }
        };

        let entry: CacheEntry = match rmp_serde::from_slice(&data) {
            Ok(entry) => entry,
            Err(e) => {
                // Corrupt entry: treat as a miss and drop the file so it
                // is not decoded again.
                warn!(path = ?path, error = %e, "Corrupt cache entry");
                self.stats.record_error();
                self.stats.record_miss();
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        };

        if entry.modified_at == modified_at {
            self.stats.record_hit();
            Some(entry.payload)
        } else {
            self.stats.record_miss();
            None
        }
    }

    async fn set(&self, key: &Path, payload: AnalysisPayload, modified_at: DateTime<Utc>) {
        let entry = CacheEntry {
            payload,
            modified_at,
            stored_at: Utc::now(),
        };

        let data = match rmp_serde::to_vec(&entry) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = ?key, error = %e, "Failed to encode cache entry");
                self.stats.record_error();
                return;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.base_dir).await {
            warn!(dir = ?self.base_dir, error = %e, "Failed to create cache dir");
            self.stats.record_error();
            return;
        }

        // Atomic write: temp file, then rename
        let path = self.entry_path(key);
        let temp_path = self.base_dir.join(format!(".{}.tmp", self.key_for(key)));
        let result = async {
            tokio::fs::write(&temp_path, &data).await?;
            tokio::fs::rename(&temp_path, &path).await
        }
        .await;

        match result {
            Ok(()) => {
                self.stats.record_write();
                debug!(path = ?path, size = data.len(), "Wrote cache entry");
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to write cache entry");
                self.stats.record_error();
            }
        }
    }

    async fn remove(&self, key: &Path) {
        let path = self.entry_path(key);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove cache entry");
                self.stats.record_error();
            }
        }
    }

    async fn clear(&self) {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(_) => return, // Missing dir is an empty cache
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().map_or(false, |e| e == "bin") {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = ?path, error = %e, "Failed to remove cache entry");
                    self.stats.record_error();
                }
            }
        }
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
