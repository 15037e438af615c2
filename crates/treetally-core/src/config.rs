//! Configuration for the TreeTally index.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Rule file names, read relative to the scan root
    #[serde(default)]
    pub rule_files: RuleFileConfig,

    /// Traversal limits
    #[serde(default)]
    pub scan: ScanConfig,

    /// Which cache strategy to use
    #[serde(default)]
    pub cache_strategy: CacheStrategy,

    /// Base directory for the persistent cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Names of the layered rule files consumed by the rule engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFileConfig {
    /// Primary exclude file; its exclusions always win
    #[serde(default = "default_primary_exclude")]
    pub primary_exclude: String,

    /// Secondary exclude file
    #[serde(default = "default_secondary_exclude")]
    pub secondary_exclude: String,

    /// Whitelist file; its presence flips the default policy
    #[serde(default = "default_whitelist")]
    pub whitelist: String,
}

/// Traversal limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Maximum directory depth to descend (root is depth 0)
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Whether to follow symlinks (cycle detection applies when enabled)
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Maximum file size to analyze in bytes (larger files are skipped)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

/// Cache strategy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// In-memory cache, lost on restart
    #[default]
    Memory,
    /// On-disk cache, survives restarts
    Disk,
}

fn default_primary_exclude() -> String {
    ".ttignore".to_string()
}

fn default_secondary_exclude() -> String {
    ".ttignore.local".to_string()
}

fn default_whitelist() -> String {
    ".ttinclude".to_string()
}

fn default_max_depth() -> usize {
    32
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_cache_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("treetally")
        .join("cache")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuleFileConfig {
    fn default() -> Self {
        Self {
            primary_exclude: default_primary_exclude(),
            secondary_exclude: default_secondary_exclude(),
            whitelist: default_whitelist(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            follow_symlinks: false,
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            rule_files: RuleFileConfig::default(),
            scan: ScanConfig::default(),
            cache_strategy: CacheStrategy::default(),
            cache_dir: default_cache_dir(),
            log_level: default_log_level(),
        }
    }
}

impl IndexConfig {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        let config_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("treetally")
            .join("config.yaml");

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_yaml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config file: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self, crate::CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| crate::CoreError::InvalidConfig(e.to_string()))
    }

    /// Ensure the cache directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }
}
