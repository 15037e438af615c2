//! TreeTally Indexer
//!
//! This crate provides the filtered, incremental, cache-coherent file index
//! for TreeTally, including:
//! - A rule engine for layered include/exclude rule files
//! - A filtered file system scanner with binary detection
//! - A modification-time-keyed result cache (memory or disk)
//! - An incremental index that stays consistent under change events
//! - File watching with debounced incremental updates

mod error;

pub mod analyzer;
pub mod cache;
pub mod index;
pub mod rules;
pub mod scanner;
pub mod watch;

pub use analyzer::{AnalysisPayload, Analyzer, HeuristicAnalyzer, Symbol, SymbolKind};
pub use cache::{AnalysisCache, CacheStatsSnapshot, DiskCache, MemoryCache};
pub use error::IndexerError;
pub use index::{IncrementalIndex, IndexEvent, IndexOptions, IndexState, IndexStats};
pub use rules::{MatchRule, PolicyContext, RuleSet};
pub use scanner::{CancelToken, FileDescriptor, ScanOptions, ScanStatsSnapshot, Scanner};
pub use watch::{ChangeBatcher, ChangeEvent, ChangeKind, FileWatcher, WatcherOptions};
