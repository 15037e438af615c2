//! In-memory cache strategy.

use super::{AnalysisCache, CacheEntry, CacheStats, CacheStatsSnapshot};
use crate::analyzer::AnalysisPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Cache whose entries live only for the process lifetime.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    stats: CacheStats,
}

impl MemoryCache {
    /// Create an empty in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl AnalysisCache for MemoryCache {
    async fn get(&self, key: &Path, modified_at: DateTime<Utc>) -> Option<AnalysisPayload> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.modified_at == modified_at => {
                self.stats.record_hit();
                Some(entry.payload.clone())
            }
            _ => {
                self.stats.record_miss();
                None
            }
        }
    }

    async fn set(&self, key: &Path, payload: AnalysisPayload, modified_at: DateTime<Utc>) {
        let entry = CacheEntry {
            payload,
            modified_at,
            stored_at: Utc::now(),
        };
        self.entries.write().insert(key.to_path_buf(), entry);
        self.stats.record_write();
    }

    async fn remove(&self, key: &Path) {
        self.entries.write().remove(key);
    }

    async fn clear(&self) {
        self.entries.write().clear();
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
