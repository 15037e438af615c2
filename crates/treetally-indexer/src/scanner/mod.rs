//! Filtered file system scanner.
//!
//! Depth-first recursive descent that consults the rule engine per entry,
//! classifies content as text or binary, and yields file descriptors plus
//! traversal statistics. Directory-level failures are counted and skipped;
//! partial results are always returned.

use crate::rules::PolicyContext;
use crate::IndexerError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A discovered, in-scope, text-classified file.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Path relative to the scan root
    pub relative_path: PathBuf,
    /// File name
    pub name: String,
    /// File extension, if any
    pub extension: Option<String>,
    /// File size in bytes
    pub size: u64,
    /// Last modified time, full precision
    pub modified_at: DateTime<Utc>,
    /// Creation time, where the platform reports one
    pub created_at: Option<DateTime<Utc>>,
}

/// Options for scanning a tree.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Maximum directory depth to descend (root is depth 0)
    pub max_depth: usize,
    /// Whether to follow symlinks (visited real paths are tracked to
    /// break cycles when enabled)
    pub follow_symlinks: bool,
    /// Maximum file size in bytes (larger files are counted as ignored)
    pub max_file_size: u64,
    /// How many leading bytes to inspect for binary classification
    pub binary_check_bytes: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: 32,
            follow_symlinks: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
            binary_check_bytes: 8192,
        }
    }
}

impl From<&treetally_core::ScanConfig> for ScanOptions {
    fn from(config: &treetally_core::ScanConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            follow_symlinks: config.follow_symlinks,
            max_file_size: config.max_file_size,
            ..Default::default()
        }
    }
}

/// Traversal statistics, readable at any time and resettable between scans.
#[derive(Debug, Default)]
pub struct ScanStats {
    files_scanned: AtomicU64,
    directories_traversed: AtomicU64,
    files_ignored: AtomicU64,
    errors: AtomicU64,
}

/// A point-in-time copy of [`ScanStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStatsSnapshot {
    pub files_scanned: u64,
    pub directories_traversed: u64,
    pub files_ignored: u64,
    pub errors: u64,
}

impl ScanStats {
    /// Take a snapshot of the current counters.
    pub fn snapshot(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            directories_traversed: self.directories_traversed.load(Ordering::Relaxed),
            files_ignored: self.files_ignored.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.files_scanned.store(0, Ordering::Relaxed);
        self.directories_traversed.store(0, Ordering::Relaxed);
        self.files_ignored.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cooperative cancellation flag, checked at file/directory granularity.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the scan returns its partial result.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// The scanner that walks a tree and applies the rule engine.
pub struct Scanner {
    options: ScanOptions,
    stats: Arc<ScanStats>,
    cancel: CancelToken,
}

impl Scanner {
    /// Create a new scanner with default options.
    pub fn new() -> Self {
        Self::with_options(ScanOptions::default())
    }

    /// Create a scanner with custom options.
    pub fn with_options(options: ScanOptions) -> Self {
        Self {
            options,
            stats: Arc::new(ScanStats::default()),
            cancel: CancelToken::new(),
        }
    }

    /// The live stats counters.
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// The cancellation token for in-progress scans.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Scan a tree and return descriptors for every in-scope text file.
    ///
    /// Counters are reset at the start of each scan. Results are sorted
    /// by relative path for deterministic ordering. A missing root is
    /// fatal; everything below it is recovered per-directory.
    pub async fn scan(
        &self,
        root: &Path,
        policy: &PolicyContext,
    ) -> Result<Vec<FileDescriptor>, IndexerError> {
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|_| IndexerError::RootNotFound(root.to_path_buf()))?;
        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|_| IndexerError::RootNotFound(root.clone()))?;
        if !meta.is_dir() {
            return Err(IndexerError::RootNotFound(root));
        }

        self.stats.reset();
        info!(path = ?root, "Starting scan");

        let mut out = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(root.clone());

        self.walk_dir(&root, &root, 0, policy, &mut out, &mut visited)
            .await;

        out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let snapshot = self.stats.snapshot();
        info!(
            files = snapshot.files_scanned,
            directories = snapshot.directories_traversed,
            ignored = snapshot.files_ignored,
            errors = snapshot.errors,
            "Scan complete"
        );

        Ok(out)
    }

    fn walk_dir<'a>(
        &'a self,
        root: &'a Path,
        dir: &'a Path,
        depth: usize,
        policy: &'a PolicyContext,
        out: &'a mut Vec<FileDescriptor>,
        visited: &'a mut HashSet<PathBuf>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.stats.directories_traversed.fetch_add(1, Ordering::Relaxed);

            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    // Permission denied or directory removed mid-scan:
                    // skip this subtree, keep the rest of the scan alive.
                    warn!(path = ?dir, error = %e, "Failed to read directory");
                    self.stats.record_error();
                    return;
                }
            };

            loop {
                if self.cancel.is_cancelled() {
                    debug!(path = ?dir, "Scan cancelled");
                    return;
                }

                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = ?dir, error = %e, "Failed to read directory entry");
                        self.stats.record_error();
                        break;
                    }
                };

                let path = entry.path();
                let rel = relative_str(root, &path);

                let file_type = match entry.file_type().await {
                    Ok(ft) => ft,
                    Err(e) => {
                        debug!(path = ?path, error = %e, "Failed to read file type");
                        self.stats.record_error();
                        continue;
                    }
                };

                if file_type.is_symlink() {
                    if !self.options.follow_symlinks {
                        continue;
                    }
                    let real = match tokio::fs::canonicalize(&path).await {
                        Ok(real) => real,
                        Err(e) => {
                            debug!(path = ?path, error = %e, "Broken symlink");
                            self.stats.record_error();
                            continue;
                        }
                    };
                    // Break symlink cycles by tracking visited real paths
                    if !visited.insert(real.clone()) {
                        debug!(path = ?path, "Symlink cycle detected");
                        continue;
                    }
                    let is_dir = tokio::fs::metadata(&real)
                        .await
                        .map(|m| m.is_dir())
                        .unwrap_or(false);
                    if is_dir {
                        if !policy.decide(&rel, true) && depth < self.options.max_depth {
                            self.walk_dir(root, &path, depth + 1, policy, out, visited)
                                .await;
                        } else {
                            self.stats.files_ignored.fetch_add(1, Ordering::Relaxed);
                        }
                    } else {
                        self.visit_file(root, &path, &rel, policy, out).await;
                    }
                    continue;
                }

                if file_type.is_dir() {
                    if policy.decide(&rel, true) {
                        self.stats.files_ignored.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    if depth < self.options.max_depth {
                        self.walk_dir(root, &path, depth + 1, policy, out, visited)
                            .await;
                    }
                    continue;
                }

                self.visit_file(root, &path, &rel, policy, out).await;
            }
        })
    }

    async fn visit_file(
        &self,
        root: &Path,
        path: &Path,
        rel: &str,
        policy: &PolicyContext,
        out: &mut Vec<FileDescriptor>,
    ) {
        if policy.decide(rel, false) {
            self.stats.files_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = ?path, error = %e, "Failed to read metadata");
                self.stats.record_error();
                return;
            }
        };

        if meta.len() > self.options.max_file_size {
            debug!(path = ?path, size = meta.len(), "Skipping large file");
            self.stats.files_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.is_binary(path).await {
            Ok(true) => {
                self.stats.files_ignored.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                debug!(path = ?path, error = %e, "Failed to read file");
                self.stats.record_error();
                return;
            }
        }

        let modified_at = match meta.modified() {
            Ok(t) => DateTime::<Utc>::from(t),
            Err(e) => {
                debug!(path = ?path, error = %e, "No modification time");
                self.stats.record_error();
                return;
            }
        };
        let created_at = meta.created().ok().map(DateTime::<Utc>::from);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string());

        self.stats.files_scanned.fetch_add(1, Ordering::Relaxed);

        out.push(FileDescriptor {
            path: path.to_path_buf(),
            relative_path: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
            name,
            extension,
            size: meta.len(),
            modified_at,
            created_at,
        });
    }

    /// Classify a file as binary by inspecting its first chunk.
    ///
    /// A NUL byte or a high ratio of non-printable bytes marks the file
    /// as binary.
    async fn is_binary(&self, path: &Path) -> Result<bool, std::io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = tokio::fs::File::open(path).await?;
        let mut buf = vec![0u8; self.options.binary_check_bytes];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);

        Ok(is_binary_chunk(&buf))
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Relative path from `root` with `/` separators.
fn relative_str(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut out = String::new();
    for component in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

/// Binary heuristic over a leading chunk of file content.
pub(crate) fn is_binary_chunk(chunk: &[u8]) -> bool {
    if chunk.is_empty() {
        return false;
    }
    let mut non_printable = 0usize;
    for &b in chunk {
        if b == 0 {
            return true;
        }
        if b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t' {
            non_printable += 1;
        } else if b == 0x7f {
            non_printable += 1;
        }
    }
    non_printable * 100 / chunk.len() > 30
}
