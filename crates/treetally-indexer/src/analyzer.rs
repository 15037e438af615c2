//! Analyzer collaborator interface.
//!
//! The index treats analysis as an opaque computation: file content plus a
//! path hint in, a payload of token count and symbol descriptors out.
//! [`HeuristicAnalyzer`] ships as a built-in so the pipeline runs
//! stand-alone; accurate tokenizers and per-language extractors plug in
//! behind the [`Analyzer`] trait.

use crate::IndexerError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The per-file analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    /// Estimated token count
    pub tokens: u64,
    /// Extracted symbols
    pub symbols: Vec<Symbol>,
}

/// A code symbol (function, class, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// Symbol name
    pub name: String,
    /// Kind of symbol
    pub kind: SymbolKind,
    /// Line the symbol is declared on (1-indexed)
    pub line: usize,
}

/// Kind of symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Interface,
    Trait,
    Module,
    Constant,
}

/// The analyzer collaborator contract.
///
/// May be slow or fail per file; the index recovers by counting the
/// failure and excluding the file from the aggregate.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Compute the analysis payload for one file's content.
    async fn analyze(&self, content: &str, path: &Path) -> Result<AnalysisPayload, IndexerError>;
}

/// Built-in analyzer with a word-cluster token estimate and regex-based
/// line symbol extraction.
pub struct HeuristicAnalyzer {
    symbol_patterns: Vec<(Regex, SymbolKind)>,
}

impl HeuristicAnalyzer {
    /// Create an analyzer with the default symbol patterns.
    pub fn new() -> Self {
        let patterns = [
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Function),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Struct),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Enum),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Trait),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Module),
            (r"^\s*(?:pub(?:\([^)]*\))?\s+)?const\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Constant),
            (r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)", SymbolKind::Class),
            (r"^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)", SymbolKind::Function),
            (r"^\s*(?:export\s+)?interface\s+([A-Za-z_$][A-Za-z0-9_$]*)", SymbolKind::Interface),
            (r"^\s*(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)", SymbolKind::Function),
        ];

        let symbol_patterns = patterns
            .into_iter()
            .map(|(p, kind)| (Regex::new(p).expect("static pattern"), kind))
            .collect();

        Self { symbol_patterns }
    }

    fn extract_symbols(&self, content: &str) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            for (pattern, kind) in &self.symbol_patterns {
                if let Some(captures) = pattern.captures(line) {
                    if let Some(name) = captures.get(1) {
                        symbols.push(Symbol {
                            name: name.as_str().to_string(),
                            kind: *kind,
                            line: idx + 1,
                        });
                        break;
                    }
                }
            }
        }
        symbols
    }
}

impl Default for HeuristicAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
    async fn analyze(&self, content: &str, _path: &Path) -> Result<AnalysisPayload, IndexerError> {
        Ok(AnalysisPayload {
            tokens: estimate_tokens(content),
            symbols: self.extract_symbols(content),
        })
    }
}

/// Rough token estimate: each whitespace-separated word contributes one
/// token per four characters, rounded up.
pub fn estimate_tokens(content: &str) -> u64 {
    content
        .split_whitespace()
        .map(|word| (word.chars().count() as u64 + 3) / 4)
        .sum()
}
