//! Incremental, cache-coherent file index.
//!
//! Owns the authoritative path→payload mapping and a running token
//! aggregate. Populated once via the scanner and the result cache; after
//! that it reacts only to change events, never by re-scanning. Updates to
//! a given path are serialized through a per-path lock; different paths
//! proceed in parallel; the aggregate is maintained with atomic deltas.

use crate::analyzer::{AnalysisPayload, Analyzer};
use crate::cache::{AnalysisCache, CacheStatsSnapshot, DiskCache, MemoryCache};
use crate::rules::PolicyContext;
use crate::scanner::{FileDescriptor, ScanOptions, ScanStatsSnapshot, Scanner};
use crate::watch::{ChangeEvent, ChangeKind};
use crate::IndexerError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use treetally_core::{CacheStrategy, IndexConfig};

/// Index lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No population has happened yet
    Uninitialized,
    /// Initial traversal in progress
    Populating,
    /// Reacting to change events only
    Steady,
}

/// Notification emitted by the index.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    /// A file was (re)analyzed in response to a change event
    Analyzed {
        path: PathBuf,
        payload: AnalysisPayload,
    },
    /// A file was removed from the index
    Deleted { path: PathBuf },
    /// Initial population finished
    PopulationComplete { total_tokens: u64 },
}

/// A point-in-time view of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of live index entries
    pub files: usize,
    /// Running token aggregate across all entries
    pub total_tokens: u64,
    /// Files whose analysis failed and are excluded from the aggregate
    pub analyzer_errors: u64,
    /// Files that vanished or became unreadable between discovery and
    /// analysis
    pub file_errors: u64,
    /// Current lifecycle state
    pub state: IndexState,
}

/// One entry per known file.
#[derive(Debug, Clone)]
struct IndexEntry {
    payload: AnalysisPayload,
    modified_at: DateTime<Utc>,
}

/// Per-path serialization slot.
///
/// `last_applied` is the `observed_at` stamp of the newest change event
/// applied to this path; populate-time computation defers to it.
#[derive(Debug, Default)]
struct PathSlot {
    last_applied: Option<DateTime<Utc>>,
}

/// Options for constructing an index.
pub struct IndexOptions {
    /// Rule file names read relative to the scan root
    pub rule_files: treetally_core::RuleFileConfig,
    /// Scanner options
    pub scan: ScanOptions,
    /// How many files to populate concurrently
    pub populate_concurrency: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            rule_files: treetally_core::RuleFileConfig::default(),
            scan: ScanOptions::default(),
            populate_concurrency: 8,
        }
    }
}

struct IndexInner {
    analyzer: Arc<dyn Analyzer>,
    cache: Arc<dyn AnalysisCache>,
    options: IndexOptions,

    state: RwLock<IndexState>,
    root: RwLock<Option<PathBuf>>,
    policy: RwLock<Arc<PolicyContext>>,

    entries: RwLock<HashMap<PathBuf, IndexEntry>>,
    error_paths: RwLock<HashSet<PathBuf>>,
    total_tokens: AtomicU64,
    analyzer_errors: AtomicU64,
    file_errors: AtomicU64,

    // Per-path locks; the outer mutex only guards the slot map itself
    slots: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<PathSlot>>>>,

    events_tx: mpsc::UnboundedSender<IndexEvent>,
    notifications_sent: AtomicU64,
}

impl IndexInner {
    fn slot(&self, path: &Path) -> Arc<tokio::sync::Mutex<PathSlot>> {
        self.slots
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    fn emit(&self, event: IndexEvent) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        // Receiver may have been dropped; notifications are best-effort
        let _ = self.events_tx.send(event);
    }

    fn insert_entry(&self, path: PathBuf, payload: AnalysisPayload, modified_at: DateTime<Utc>) {
        let tokens = payload.tokens;
        let old = self.entries.write().insert(
            path,
            IndexEntry {
                payload,
                modified_at,
            },
        );
        if let Some(old) = old {
            self.total_tokens
                .fetch_sub(old.payload.tokens, Ordering::Relaxed);
        }
        self.total_tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    fn remove_entry(&self, path: &Path) -> Option<IndexEntry> {
        let old = self.entries.write().remove(path);
        if let Some(old) = &old {
            self.total_tokens
                .fetch_sub(old.payload.tokens, Ordering::Relaxed);
        }
        old
    }

    fn record_analyzer_error(&self, path: &Path, message: &str) {
        warn!(path = ?path, message, "Analyzer failed");
        self.analyzer_errors.fetch_add(1, Ordering::Relaxed);
        self.error_paths.write().insert(path.to_path_buf());
    }

    /// Populate one file during initialization.
    async fn populate_file(self: Arc<Self>, descriptor: FileDescriptor) {
        let slot = self.slot(&descriptor.path);
        let guard = slot.lock().await;

        // A change event already superseded this in-flight computation
        if guard.last_applied.is_some() {
            debug!(path = ?descriptor.path, "Populate superseded by change event");
            return;
        }

        if let Some(payload) = self
            .cache
            .get(&descriptor.path, descriptor.modified_at)
            .await
        {
            self.insert_entry(descriptor.path, payload, descriptor.modified_at);
            return;
        }

        let content = match tokio::fs::read_to_string(&descriptor.path).await {
            Ok(content) => content,
            Err(e) => {
                // File vanished between discovery and analysis
                debug!(path = ?descriptor.path, error = %e, "Failed to read file");
                self.file_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.analyzer.analyze(&content, &descriptor.path).await {
            Ok(payload) => {
                self.cache
                    .set(&descriptor.path, payload.clone(), descriptor.modified_at)
                    .await;
                self.insert_entry(descriptor.path, payload, descriptor.modified_at);
            }
            Err(e) => {
                self.record_analyzer_error(&descriptor.path, &e.to_string());
            }
        }
    }

    /// Remove a path that left the index's scope (oversized or binary).
    async fn drop_out_of_scope(&self, path: &Path) {
        if self.remove_entry(path).is_some() {
            self.cache.remove(path).await;
            self.emit(IndexEvent::Deleted {
                path: path.to_path_buf(),
            });
        }
    }

    /// Apply a single change event under the path's lock.
    async fn apply_event(self: Arc<Self>, event: ChangeEvent) -> Result<(), IndexerError> {
        // Events for paths the policy excludes never enter the index;
        // deletes still pass through so a policy change cannot strand an
        // existing entry.
        if event.kind != ChangeKind::Deleted {
            let rel = event.relative_path.to_string_lossy().replace('\\', "/");
            let policy = self.policy.read().clone();
            if policy.decide(&rel, false) {
                debug!(path = ?event.path, "Ignoring event for excluded path");
                return Ok(());
            }
        }

        let slot = self.slot(&event.path);
        let mut guard = slot.lock().await;

        // Events for the same path apply in observation order; an older
        // event arriving late is dropped, not replayed.
        if let Some(last) = guard.last_applied {
            if event.observed_at < last {
                debug!(path = ?event.path, "Dropping stale change event");
                return Ok(());
            }
        }
        guard.last_applied = Some(event.observed_at);

        match event.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                let meta = match tokio::fs::metadata(&event.path).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        // Vanished before we could look: no entry is
                        // created or updated
                        debug!(path = ?event.path, error = %e, "Changed file unreadable");
                        self.file_errors.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                };
                let modified_at = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());

                // The same scope filters the scanner applies: a file that
                // grew past the size limit or turned binary leaves the
                // index, exactly as a fresh population would treat it.
                if meta.len() > self.options.scan.max_file_size {
                    debug!(path = ?event.path, size = meta.len(), "Changed file exceeds size limit");
                    self.drop_out_of_scope(&event.path).await;
                    return Ok(());
                }

                let bytes = match tokio::fs::read(&event.path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!(path = ?event.path, error = %e, "Changed file unreadable");
                        self.file_errors.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                };

                let head = &bytes[..bytes.len().min(self.options.scan.binary_check_bytes)];
                if crate::scanner::is_binary_chunk(head) {
                    debug!(path = ?event.path, "Changed file classified as binary");
                    self.drop_out_of_scope(&event.path).await;
                    return Ok(());
                }

                let content = match String::from_utf8(bytes) {
                    Ok(content) => content,
                    Err(e) => {
                        debug!(path = ?event.path, error = %e, "Changed file is not valid UTF-8");
                        self.file_errors.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                };

                match self.analyzer.analyze(&content, &event.path).await {
                    Ok(payload) => {
                        self.cache
                            .set(&event.path, payload.clone(), modified_at)
                            .await;
                        self.insert_entry(event.path.clone(), payload.clone(), modified_at);
                        self.error_paths.write().remove(&event.path);
                        self.emit(IndexEvent::Analyzed {
                            path: event.path,
                            payload,
                        });
                    }
                    Err(e) => {
                        // The file gets an error marker instead of a
                        // payload and leaves the aggregate
                        self.remove_entry(&event.path);
                        self.cache.remove(&event.path).await;
                        self.record_analyzer_error(&event.path, &e.to_string());
                    }
                }
            }
            ChangeKind::Deleted => {
                if self.remove_entry(&event.path).is_some() {
                    self.cache.remove(&event.path).await;
                    self.emit(IndexEvent::Deleted { path: event.path });
                } else {
                    // Deleting an unknown path is a no-op
                    debug!(path = ?event.path, "Delete for unknown path");
                }
            }
        }

        Ok(())
    }
}

/// The incremental index.
pub struct IncrementalIndex {
    inner: Arc<IndexInner>,
    scanner: Scanner,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<IndexEvent>>>,
}

impl IncrementalIndex {
    /// Create an index with an explicit analyzer, cache, and options.
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        cache: Arc<dyn AnalysisCache>,
        options: IndexOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let scanner = Scanner::with_options(options.scan.clone());
        Self {
            inner: Arc::new(IndexInner {
                analyzer,
                cache,
                options,
                state: RwLock::new(IndexState::Uninitialized),
                root: RwLock::new(None),
                policy: RwLock::new(Arc::new(PolicyContext::default())),
                entries: RwLock::new(HashMap::new()),
                error_paths: RwLock::new(HashSet::new()),
                total_tokens: AtomicU64::new(0),
                analyzer_errors: AtomicU64::new(0),
                file_errors: AtomicU64::new(0),
                slots: Mutex::new(HashMap::new()),
                events_tx,
                notifications_sent: AtomicU64::new(0),
            }),
            scanner,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Create an index from configuration, choosing the cache strategy.
    pub fn from_config(config: &IndexConfig, analyzer: Arc<dyn Analyzer>) -> Self {
        let cache: Arc<dyn AnalysisCache> = match config.cache_strategy {
            CacheStrategy::Memory => Arc::new(MemoryCache::new()),
            CacheStrategy::Disk => Arc::new(DiskCache::new(config.cache_dir.clone())),
        };
        let options = IndexOptions {
            rule_files: config.rule_files.clone(),
            scan: ScanOptions::from(&config.scan),
            ..Default::default()
        };
        Self::new(analyzer, cache, options)
    }

    /// Take the notification receiver; there is a single consumer.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<IndexEvent>> {
        self.events_rx.lock().take()
    }

    /// Populate the index by scanning the root.
    ///
    /// Rule files are loaded relative to the root at this point; a changed
    /// rule file means re-initializing. Re-initialization resets entries,
    /// aggregate, and error markers first.
    pub async fn initialize(&self, root: &Path) -> Result<IndexStats, IndexerError> {
        {
            let mut state = self.inner.state.write();
            *state = IndexState::Populating;
        }
        self.inner.entries.write().clear();
        self.inner.error_paths.write().clear();
        self.inner.total_tokens.store(0, Ordering::Relaxed);
        self.inner.analyzer_errors.store(0, Ordering::Relaxed);
        self.inner.file_errors.store(0, Ordering::Relaxed);
        self.inner.slots.lock().clear();

        let policy = Arc::new(PolicyContext::load(root, &self.inner.options.rule_files));
        *self.inner.policy.write() = policy.clone();

        let descriptors = match self.scanner.scan(root, &policy).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                *self.inner.state.write() = IndexState::Uninitialized;
                return Err(e);
            }
        };
        *self.inner.root.write() = Some(root.to_path_buf());

        info!(files = descriptors.len(), "Populating index");

        let mut pending = descriptors.into_iter();
        let mut tasks: JoinSet<()> = JoinSet::new();
        loop {
            while tasks.len() < self.inner.options.populate_concurrency.max(1) {
                match pending.next() {
                    Some(descriptor) => {
                        let inner = self.inner.clone();
                        tasks.spawn(inner.populate_file(descriptor));
                    }
                    None => break,
                }
            }
            if tasks.join_next().await.is_none() {
                break;
            }
        }

        {
            let mut state = self.inner.state.write();
            *state = IndexState::Steady;
        }

        let stats = self.stats();
        self.inner.emit(IndexEvent::PopulationComplete {
            total_tokens: stats.total_tokens,
        });
        info!(
            files = stats.files,
            total_tokens = stats.total_tokens,
            errors = stats.analyzer_errors,
            "Population complete"
        );

        Ok(stats)
    }

    /// Apply one change event.
    pub async fn apply(&self, event: ChangeEvent) -> Result<(), IndexerError> {
        self.inner.clone().apply_event(event).await
    }

    /// The root the index was last initialized against.
    pub fn root(&self) -> Option<PathBuf> {
        self.inner.root.read().clone()
    }

    /// Pure in-memory lookup; never triggers computation or I/O.
    pub fn analysis(&self, path: &Path) -> Option<AnalysisPayload> {
        self.inner
            .entries
            .read()
            .get(path)
            .map(|entry| entry.payload.clone())
    }

    /// Modification time recorded for a path, if indexed.
    pub fn recorded_mtime(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.inner
            .entries
            .read()
            .get(path)
            .map(|entry| entry.modified_at)
    }

    /// Whether a path is marked as failed analysis.
    pub fn has_error(&self, path: &Path) -> bool {
        self.inner.error_paths.read().contains(path)
    }

    /// Current index statistics.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            files: self.inner.entries.read().len(),
            total_tokens: self.inner.total_tokens.load(Ordering::Relaxed),
            analyzer_errors: self.inner.analyzer_errors.load(Ordering::Relaxed),
            file_errors: self.inner.file_errors.load(Ordering::Relaxed),
            state: *self.inner.state.read(),
        }
    }

    /// The underlying result cache's counters.
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.inner.cache.stats()
    }

    /// The scanner's traversal counters.
    pub fn scan_stats(&self) -> ScanStatsSnapshot {
        self.scanner.stats().snapshot()
    }

    /// Number of notifications emitted so far.
    pub fn notifications_sent(&self) -> u64 {
        self.inner.notifications_sent.load(Ordering::Relaxed)
    }

    /// Rebuild the aggregate from the live entries.
    ///
    /// The one permitted full re-summation; returns the delta it had to
    /// repair, which is zero unless something went wrong.
    pub fn reconcile(&self) -> i64 {
        let entries = self.inner.entries.read();
        let actual: u64 = entries.values().map(|e| e.payload.tokens).sum();
        let recorded = self.inner.total_tokens.swap(actual, Ordering::Relaxed);
        let delta = actual as i64 - recorded as i64;
        if delta != 0 {
            warn!(recorded, actual, delta, "Aggregate drift repaired");
        }
        delta
    }

    /// Clear the result cache.
    ///
    /// Also clears the index entries and aggregate and returns the state
    /// to `Uninitialized`: an aggregate the cache can no longer
    /// substantiate is not served. The next `initialize` rebuilds both.
    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
        self.inner.entries.write().clear();
        self.inner.error_paths.write().clear();
        self.inner.total_tokens.store(0, Ordering::Relaxed);
        self.inner.analyzer_errors.store(0, Ordering::Relaxed);
        self.inner.file_errors.store(0, Ordering::Relaxed);
        self.inner.slots.lock().clear();
        *self.inner.state.write() = IndexState::Uninitialized;
        info!("Cache cleared; index reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::HeuristicAnalyzer;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    fn new_index() -> IncrementalIndex {
        IncrementalIndex::new(
            Arc::new(HeuristicAnalyzer::new()),
            Arc::new(MemoryCache::new()),
            IndexOptions::default(),
        )
    }

    fn event(path: &Path, root: &Path, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent::new(root, path.to_path_buf(), kind)
    }

    /// Recompute the aggregate from scratch and compare with the running one.
    fn assert_aggregate_consistent(index: &IncrementalIndex) {
        let entries = index.inner.entries.read();
        let expected: u64 = entries.values().map(|e| e.payload.tokens).sum();
        drop(entries);
        assert_eq!(index.stats().total_tokens, expected);
    }

    #[tokio::test]
    async fn test_initialize_populates_entries() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.rs"), "fn alpha() {}").unwrap();
        fs::write(temp_dir.path().join("b.rs"), "fn beta() {}").unwrap();

        let index = new_index();
        assert_eq!(index.stats().state, IndexState::Uninitialized);

        let stats = index.initialize(temp_dir.path()).await.unwrap();

        assert_eq!(stats.files, 2);
        assert!(stats.total_tokens > 0);
        assert_eq!(stats.state, IndexState::Steady);
        assert_aggregate_consistent(&index);
    }

    #[tokio::test]
    async fn test_initialize_missing_root_fails() {
        let index = new_index();
        let result = index.initialize(Path::new("/nonexistent/root")).await;
        assert!(matches!(result, Err(IndexerError::RootNotFound(_))));
        assert_eq!(index.stats().state, IndexState::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_respects_rule_files() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(".ttignore"), "*.log\n.ttignore\n").unwrap();
        fs::write(temp_dir.path().join("keep.rs"), "fn keep() {}").unwrap();
        fs::write(temp_dir.path().join("drop.log"), "log line").unwrap();

        let index = new_index();
        let stats = index.initialize(temp_dir.path()).await.unwrap();

        assert_eq!(stats.files, 1);
        assert!(index
            .analysis(&temp_dir.path().join("keep.rs").canonicalize().unwrap())
            .is_some());
    }

    #[tokio::test]
    async fn test_second_initialize_hits_cache() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.rs"), "fn alpha() {}").unwrap();

        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();
        let first = index.cache_stats();
        assert_eq!(first.hits, 0);
        assert_eq!(first.writes, 1);

        index.initialize(temp_dir.path()).await.unwrap();
        let second = index.cache_stats();
        assert_eq!(second.hits, 1);
        assert_eq!(second.writes, 1);
    }

    #[tokio::test]
    async fn test_population_complete_notification() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.rs"), "fn alpha() {}").unwrap();

        let index = new_index();
        let mut events = index.take_events().unwrap();
        let stats = index.initialize(temp_dir.path()).await.unwrap();

        let event = events.recv().await.unwrap();
        match event {
            IndexEvent::PopulationComplete { total_tokens } => {
                assert_eq!(total_tokens, stats.total_tokens);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_created_event_adds_entry() {
        let temp_dir = tempdir().unwrap();
        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();
        assert_eq!(index.stats().files, 0);

        let path = temp_dir.path().join("new.rs");
        fs::write(&path, "fn created() {}").unwrap();

        let mut events = index.take_events().unwrap();
        index
            .apply(event(&path, temp_dir.path(), ChangeKind::Created))
            .await
            .unwrap();

        assert_eq!(index.stats().files, 1);
        assert!(index.analysis(&path).is_some());
        assert_aggregate_consistent(&index);

        // PopulationComplete came first, then Analyzed
        let _ = events.recv().await.unwrap();
        match events.recv().await.unwrap() {
            IndexEvent::Analyzed { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_modified_event_replaces_contribution() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("file.rs");
        fs::write(&path, "fn a() {}").unwrap();

        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();
        let canonical = temp_dir.path().join("file.rs").canonicalize().unwrap();
        let before = index.stats().total_tokens;

        fs::write(&canonical, "fn a() {}\nfn b() {}\nfn c() {}\n").unwrap();
        index
            .apply(event(&canonical, temp_dir.path(), ChangeKind::Modified))
            .await
            .unwrap();

        let after = index.stats().total_tokens;
        assert!(after > before);
        assert_eq!(index.stats().files, 1);
        assert_aggregate_consistent(&index);
    }

    #[tokio::test]
    async fn test_deleted_event_and_double_delete() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("gone.rs");
        fs::write(&path, "fn gone() {}").unwrap();

        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();
        let canonical = temp_dir.path().join("gone.rs").canonicalize().unwrap();
        assert!(index.stats().total_tokens > 0);

        fs::remove_file(&canonical).unwrap();
        index
            .apply(event(&canonical, temp_dir.path(), ChangeKind::Deleted))
            .await
            .unwrap();
        assert_eq!(index.stats().files, 0);
        assert_eq!(index.stats().total_tokens, 0);

        // Double delete changes the aggregate exactly once
        index
            .apply(event(&canonical, temp_dir.path(), ChangeKind::Deleted))
            .await
            .unwrap();
        assert_eq!(index.stats().total_tokens, 0);
        assert_aggregate_consistent(&index);
    }

    #[tokio::test]
    async fn test_stale_event_is_dropped() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("file.rs");
        fs::write(&path, "fn a() {}").unwrap();

        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();
        let canonical = temp_dir.path().join("file.rs").canonicalize().unwrap();

        let stale = ChangeEvent {
            path: canonical.clone(),
            relative_path: PathBuf::from("file.rs"),
            kind: ChangeKind::Deleted,
            observed_at: Utc::now() - chrono::Duration::seconds(60),
        };
        let fresh = event(&canonical, temp_dir.path(), ChangeKind::Modified);

        index.apply(fresh).await.unwrap();
        index.apply(stale).await.unwrap();

        // The stale delete did not win
        assert_eq!(index.stats().files, 1);
        assert_aggregate_consistent(&index);
    }

    #[tokio::test]
    async fn test_analyzer_failure_excludes_file() {
        struct FailingAnalyzer;

        #[async_trait]
        impl Analyzer for FailingAnalyzer {
            async fn analyze(
                &self,
                _content: &str,
                path: &Path,
            ) -> Result<AnalysisPayload, IndexerError> {
                if path.ends_with("bad.rs") {
                    Err(IndexerError::Analyzer("boom".to_string()))
                } else {
                    Ok(AnalysisPayload {
                        tokens: 10,
                        symbols: vec![],
                    })
                }
            }
        }

        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("good.rs"), "fn ok() {}").unwrap();
        fs::write(temp_dir.path().join("bad.rs"), "fn broken() {}").unwrap();

        let index = IncrementalIndex::new(
            Arc::new(FailingAnalyzer),
            Arc::new(MemoryCache::new()),
            IndexOptions::default(),
        );
        let stats = index.initialize(temp_dir.path()).await.unwrap();

        assert_eq!(stats.files, 1);
        assert_eq!(stats.total_tokens, 10);
        assert_eq!(stats.analyzer_errors, 1);
        let bad = temp_dir.path().join("bad.rs").canonicalize().unwrap();
        assert!(index.has_error(&bad));
        assert!(index.analysis(&bad).is_none());
        assert_aggregate_consistent(&index);
    }

    #[tokio::test]
    async fn test_delete_for_unknown_path_is_noop() {
        let temp_dir = tempdir().unwrap();
        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();

        index
            .apply(event(
                &temp_dir.path().join("never_seen.rs"),
                temp_dir.path(),
                ChangeKind::Deleted,
            ))
            .await
            .unwrap();

        assert_eq!(index.stats().files, 0);
        assert_eq!(index.notifications_sent(), 1); // PopulationComplete only
    }

    #[tokio::test]
    async fn test_event_for_excluded_path_is_ignored() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(".ttignore"), "*.log\n.ttignore\n").unwrap();

        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();

        let path = temp_dir.path().join("noise.log");
        fs::write(&path, "log line").unwrap();
        index
            .apply(event(&path, temp_dir.path(), ChangeKind::Created))
            .await
            .unwrap();

        assert_eq!(index.stats().files, 0);
        assert!(index.analysis(&path).is_none());
    }

    #[tokio::test]
    async fn test_oversized_changed_file_is_not_indexed() {
        let temp_dir = tempdir().unwrap();
        let index = IncrementalIndex::new(
            Arc::new(HeuristicAnalyzer::new()),
            Arc::new(MemoryCache::new()),
            IndexOptions {
                scan: crate::scanner::ScanOptions {
                    max_file_size: 64,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        index.initialize(temp_dir.path()).await.unwrap();

        let path = temp_dir.path().join("huge.txt");
        fs::write(&path, "x ".repeat(100)).unwrap();
        index
            .apply(event(&path, temp_dir.path(), ChangeKind::Created))
            .await
            .unwrap();

        assert_eq!(index.stats().files, 0);
        assert!(index.analysis(&path).is_none());
    }

    #[tokio::test]
    async fn test_file_growing_past_size_limit_leaves_index() {
        let temp_dir = tempdir().unwrap();
        let index = IncrementalIndex::new(
            Arc::new(HeuristicAnalyzer::new()),
            Arc::new(MemoryCache::new()),
            IndexOptions {
                scan: crate::scanner::ScanOptions {
                    max_file_size: 64,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let path = temp_dir.path().join("file.txt");
        fs::write(&path, "small").unwrap();
        index.initialize(temp_dir.path()).await.unwrap();
        let canonical = path.canonicalize().unwrap();
        assert_eq!(index.stats().files, 1);

        let mut events = index.take_events().unwrap();
        fs::write(&canonical, "x ".repeat(100)).unwrap();
        index
            .apply(event(&canonical, temp_dir.path(), ChangeKind::Modified))
            .await
            .unwrap();

        // Matches what a fresh population over the same tree would hold
        assert_eq!(index.stats().files, 0);
        assert_eq!(index.stats().total_tokens, 0);
        assert_aggregate_consistent(&index);

        let _ = events.recv().await.unwrap(); // PopulationComplete
        match events.recv().await.unwrap() {
            IndexEvent::Deleted { path: p } => assert_eq!(p, canonical),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_binary_changed_file_is_not_indexed() {
        let temp_dir = tempdir().unwrap();
        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();

        let path = temp_dir.path().join("blob.dat");
        fs::write(&path, [0u8, 159, 146, 150, 0, 1]).unwrap();
        index
            .apply(event(&path, temp_dir.path(), ChangeKind::Created))
            .await
            .unwrap();

        assert_eq!(index.stats().files, 0);
        assert!(index.analysis(&path).is_none());
    }

    #[tokio::test]
    async fn test_reconcile_reports_zero_drift() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.rs"), "fn alpha() {}").unwrap();

        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();

        assert_eq!(index.reconcile(), 0);
    }

    #[tokio::test]
    async fn test_clear_cache_resets_index() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.rs"), "fn alpha() {}").unwrap();

        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();
        assert!(index.stats().total_tokens > 0);

        index.clear_cache().await;

        let stats = index.stats();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.state, IndexState::Uninitialized);

        // Re-initialization rebuilds from scratch
        let stats = index.initialize(temp_dir.path()).await.unwrap();
        assert_eq!(stats.files, 1);
        assert!(stats.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_analysis_is_pure_lookup() {
        let temp_dir = tempdir().unwrap();
        let index = new_index();
        index.initialize(temp_dir.path()).await.unwrap();

        // Unknown path: no computation is triggered, cache untouched
        let misses_before = index.cache_stats().misses;
        assert!(index.analysis(Path::new("/not/indexed.rs")).is_none());
        assert_eq!(index.cache_stats().misses, misses_before);
    }
}
