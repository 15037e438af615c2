//! Core error types for TreeTally.

use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid path supplied by the caller
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}
