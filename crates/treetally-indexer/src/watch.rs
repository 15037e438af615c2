//! Change-event contract and file system watch adapter.
//!
//! The incremental index consumes [`ChangeEvent`]s; it does not care who
//! produces them. [`FileWatcher`] is the default producer, backed by
//! notify (FSEvents on macOS, inotify on Linux) with debouncing. Any
//! other source can feed events directly.

use crate::IndexerError;
use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// File change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// File was created
    Created,
    /// File was modified
    Modified,
    /// File was deleted
    Deleted,
}

/// A file system change event.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Absolute path to the changed file
    pub path: PathBuf,
    /// Path relative to the watched root
    pub relative_path: PathBuf,
    /// Kind of change
    pub kind: ChangeKind,
    /// When the change was observed; used to order events for the same
    /// path when they can be reordered in transit
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event, computing the relative path from a root.
    pub fn new(root: &Path, path: PathBuf, kind: ChangeKind) -> Self {
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        Self {
            path,
            relative_path,
            kind,
            observed_at: Utc::now(),
        }
    }
}

/// Options for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Debounce duration
    pub debounce_duration: Duration,
    /// Whether to watch recursively
    pub recursive: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
            recursive: true,
        }
    }
}

/// File system watcher with debouncing.
pub struct FileWatcher {
    options: WatcherOptions,
    tx: mpsc::Sender<ChangeEvent>,
    rx: mpsc::Receiver<ChangeEvent>,
    _debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl FileWatcher {
    /// Create a new file watcher.
    pub fn new(options: WatcherOptions) -> Self {
        let (tx, rx) = mpsc::channel(1000);
        Self {
            options,
            tx,
            rx,
            _debouncer: None,
        }
    }

    /// Start watching a directory.
    pub fn watch(&mut self, path: &Path) -> Result<(), IndexerError> {
        let root = path
            .canonicalize()
            .map_err(|_| IndexerError::RootNotFound(path.to_path_buf()))?;

        let tx = self.tx.clone();
        let event_root = root.clone();

        let mut debouncer = new_debouncer(
            self.options.debounce_duration,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(change) = convert_event(&event_root, &event.event) {
                            if let Err(e) = tx.blocking_send(change) {
                                error!(error = %e, "Failed to send change event");
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "Watcher error");
                    }
                }
            },
        )
        .map_err(|e| IndexerError::Watcher(e.to_string()))?;

        let mode = if self.options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        debouncer
            .watch(&root, mode)
            .map_err(|e: notify::Error| IndexerError::Watcher(e.to_string()))?;

        info!(path = ?root, recursive = self.options.recursive, "Started watching");

        self._debouncer = Some(debouncer);

        Ok(())
    }

    /// Receive the next change event.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Try to receive a change event without blocking.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Check if there are pending events.
    pub fn has_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Convert a notify Event to our ChangeEvent.
fn convert_event(root: &Path, event: &Event) -> Option<ChangeEvent> {
    let path = event.paths.first()?.clone();

    // Only care about files, not directories
    if path.is_dir() {
        return None;
    }

    let kind = match &event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Any => return None,
        EventKind::Access(_) => return None, // Ignore access events
        EventKind::Other => return None,
    };

    debug!(path = ?path, kind = ?kind, "File change detected");

    Some(ChangeEvent::new(root, path, kind))
}

/// Batches change events for efficient processing.
pub struct ChangeBatcher {
    changes: Vec<ChangeEvent>,
    batch_timeout: Duration,
    last_batch: std::time::Instant,
}

impl ChangeBatcher {
    /// Create a new change batcher.
    pub fn new(batch_timeout: Duration) -> Self {
        Self {
            changes: Vec::new(),
            batch_timeout,
            last_batch: std::time::Instant::now(),
        }
    }

    /// Add a change to the batch.
    pub fn add(&mut self, change: ChangeEvent) {
        // Deduplicate: if we already have a change for this path, update it
        if let Some(existing) = self.changes.iter_mut().find(|c| c.path == change.path) {
            // Delete always wins over modify/create
            if change.kind == ChangeKind::Deleted {
                existing.kind = ChangeKind::Deleted;
            } else if existing.kind != ChangeKind::Deleted {
                existing.kind = change.kind;
            }
            // Keep the ordering stamp of the newest observation
            if change.observed_at > existing.observed_at {
                existing.observed_at = change.observed_at;
            }
        } else {
            self.changes.push(change);
        }
    }

    /// Check if the batch is ready to process.
    pub fn is_ready(&self) -> bool {
        !self.changes.is_empty() && self.last_batch.elapsed() >= self.batch_timeout
    }

    /// Take the current batch and reset.
    pub fn take(&mut self) -> Vec<ChangeEvent> {
        self.last_batch = std::time::Instant::now();
        std::mem::take(&mut self.changes)
    }

    /// Get the number of pending changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
