//! TreeTally Core Components
//!
//! This crate provides the shared building blocks for the TreeTally index,
//! including configuration loading and common error types.

mod config;
mod error;

pub use config::{CacheStrategy, IndexConfig, RuleFileConfig, ScanConfig};
pub use error::CoreError;
