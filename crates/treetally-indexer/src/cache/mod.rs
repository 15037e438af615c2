//! Result cache keyed by path and modification time.
//!
//! A cached payload is served only when the stored modification time
//! exactly equals the file's current modification time; any mismatch is
//! a miss, never an error. The memory and disk strategies expose an
//! identical contract so the incremental index is oblivious to which is
//! active.

mod disk;
mod memory;

pub use disk::DiskCache;
pub use memory::MemoryCache;

use crate::analyzer::AnalysisPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// A stored analysis result with the modification time it was computed at.
///
/// Written whole or not at all; a set always replaces the entire entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: AnalysisPayload,
    pub modified_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

/// Hit/miss/write/error counters for a cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// A point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// The result cache contract shared by all strategies.
#[async_trait]
pub trait AnalysisCache: Send + Sync {
    /// Look up a payload; a hit requires exact modification-time equality.
    async fn get(&self, key: &Path, modified_at: DateTime<Utc>) -> Option<AnalysisPayload>;

    /// Store a payload, unconditionally replacing any existing entry.
    async fn set(&self, key: &Path, payload: AnalysisPayload, modified_at: DateTime<Utc>);

    /// Remove a single entry, if present.
    async fn remove(&self, key: &Path);

    /// Remove all entries.
    async fn clear(&self);

    /// Current hit/miss/write/error counters.
    fn stats(&self) -> CacheStatsSnapshot;
}
