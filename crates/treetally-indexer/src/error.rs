//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during indexing operations.
///
/// Only `RootNotFound` is fatal to an operation; everything else is
/// recovered at the site it occurs and surfaced through counters.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Scan root missing or unreadable at the start of a scan
    #[error("Scan root not found: {0}")]
    RootNotFound(PathBuf),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A rule line could not be compiled into a pattern
    #[error("Malformed pattern on line {line} ({source_text}): {message}")]
    Pattern {
        line: usize,
        source_text: String,
        message: String,
    },

    /// The analyzer collaborator failed for a file
    #[error("Analyzer error: {0}")]
    Analyzer(String),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for IndexerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for IndexerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}
