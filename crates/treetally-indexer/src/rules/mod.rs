//! Rule engine for layered include/exclude rule files.
//!
//! Rule files are line-oriented, in the style of version-control ignore
//! files: `#` comments, `!` negation, trailing `/` for directory-only,
//! leading `/` for root anchoring, `*`/`**`/`?` wildcards. Each rule set
//! is compiled once at load time; evaluation is last-match-wins.

use crate::IndexerError;
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

/// A single compiled match rule.
///
/// Immutable once compiled; its position within the owning [`RuleSet`]
/// is significant.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pattern: Regex,
    /// `!`-prefixed rule: a match re-includes instead of excluding
    pub negated: bool,
    /// Trailing-`/` rule: matches a directory and its entire subtree
    pub dir_only: bool,
    /// Leading-`/` rule: must match from the start of the relative path
    pub anchored: bool,
    /// Original line text, as written
    pub source: String,
    /// Pattern text after stripping the `!`, `/` markers
    text: String,
}

impl MatchRule {
    /// Compile a single rule-file line.
    ///
    /// Returns `None` for blank lines and comments. Returns
    /// `Some(Err(_))` for lines that cannot be compiled, so the caller
    /// can record a diagnostic and keep loading.
    pub fn compile(line: &str) -> Option<Result<MatchRule, IndexerError>> {
        let source = line.to_string();
        let mut text = line.trim();

        if text.is_empty() || text.starts_with('#') {
            return None;
        }

        let negated = text.starts_with('!');
        if negated {
            text = &text[1..];
        }

        let dir_only = text.ends_with('/');
        if dir_only {
            text = &text[..text.len() - 1];
        }

        let anchored = text.starts_with('/');
        if anchored {
            text = &text[1..];
        }

        if text.is_empty() {
            return Some(Err(IndexerError::Pattern {
                line: 0,
                source_text: source,
                message: "empty pattern".to_string(),
            }));
        }

        let body = glob_to_regex(text);
        let prefix = if anchored { "^" } else { "(?:^|/)" };
        let suffix = if dir_only { "(?:/.*)?$" } else { "$" };
        let full = format!("{}{}{}", prefix, body, suffix);

        let pattern = match Regex::new(&full) {
            Ok(p) => p,
            Err(e) => {
                return Some(Err(IndexerError::Pattern {
                    line: 0,
                    source_text: source,
                    message: e.to_string(),
                }))
            }
        };

        Some(Ok(MatchRule {
            pattern,
            negated,
            dir_only,
            anchored,
            source,
            text: text.to_string(),
        }))
    }

    /// Whether this rule's pattern matches the given relative path.
    pub fn matches(&self, relative_path: &str) -> bool {
        self.pattern.is_match(relative_path)
    }

    /// Whether the pattern can reach across multiple path segments.
    pub fn spans_segments(&self) -> bool {
        self.text.contains('/') || self.text.contains("**")
    }

    /// Pattern text with the `!`, leading `/` and trailing `/` markers removed.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Translate a glob body into a regex body.
///
/// `**` matches across path segments, `*` within a single segment, `?`
/// exactly one character other than the separator. Everything else is
/// escaped literally.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` spans zero or more whole segments so that
                    // `a/**/b` also matches `a/b`
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// A diagnostic recorded for a rule line that failed to compile.
#[derive(Debug, Clone)]
pub struct PatternDiagnostic {
    /// 1-indexed line number in the rule file
    pub line: usize,
    /// The offending line text
    pub source_text: String,
    /// Why compilation failed
    pub message: String,
}

/// An ordered sequence of match rules loaded from one rule file.
///
/// Empty if the file does not exist. Malformed lines are skipped and
/// recorded as diagnostics; loading never aborts.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<MatchRule>,
    diagnostics: Vec<PatternDiagnostic>,
}

impl RuleSet {
    /// Parse rule-file text into a rule set.
    pub fn parse(text: &str) -> Self {
        let mut rules = Vec::new();
        let mut diagnostics = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            match MatchRule::compile(line) {
                None => {}
                Some(Ok(rule)) => rules.push(rule),
                Some(Err(IndexerError::Pattern {
                    source_text,
                    message,
                    ..
                })) => {
                    warn!(line = idx + 1, source = %source_text, %message, "Skipping malformed rule line");
                    diagnostics.push(PatternDiagnostic {
                        line: idx + 1,
                        source_text,
                        message,
                    });
                }
                Some(Err(e)) => {
                    warn!(line = idx + 1, error = %e, "Skipping malformed rule line");
                    diagnostics.push(PatternDiagnostic {
                        line: idx + 1,
                        source_text: line.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Self { rules, diagnostics }
    }

    /// Load a rule set from a file; a missing file yields an empty set.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let set = Self::parse(&text);
                debug!(path = ?path, rules = set.rules.len(), "Loaded rule file");
                set
            }
            Err(_) => Self::default(),
        }
    }

    /// Evaluate a relative path against every rule in file order.
    ///
    /// Returns `Some(true)` if the last matching rule excludes,
    /// `Some(false)` if it re-includes, `None` if nothing matched.
    /// Later matches unconditionally overwrite earlier ones.
    pub fn evaluate(&self, relative_path: &str) -> Option<bool> {
        let mut verdict = None;
        for rule in &self.rules {
            if rule.matches(relative_path) {
                verdict = Some(!rule.negated);
            }
        }
        verdict
    }

    /// Whether this set contains no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules in the set.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Rules in file order.
    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    /// Diagnostics for lines that failed to compile.
    pub fn diagnostics(&self) -> &[PatternDiagnostic] {
        &self.diagnostics
    }
}

/// The three rule sets a path is evaluated against.
///
/// `base_exclude` exclusions always win. A non-empty `aux_include`
/// activates include mode, flipping the default from "included unless
/// excluded" to "excluded unless whitelisted".
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub base_exclude: RuleSet,
    pub aux_exclude: RuleSet,
    pub aux_include: RuleSet,
}

impl PolicyContext {
    /// Build a policy context from three rule sets.
    pub fn new(base_exclude: RuleSet, aux_exclude: RuleSet, aux_include: RuleSet) -> Self {
        Self {
            base_exclude,
            aux_exclude,
            aux_include,
        }
    }

    /// Load the three optional rule files relative to a scan root.
    pub fn load(root: &Path, config: &treetally_core::RuleFileConfig) -> Self {
        Self {
            base_exclude: RuleSet::load(&root.join(&config.primary_exclude)),
            aux_exclude: RuleSet::load(&root.join(&config.secondary_exclude)),
            aux_include: RuleSet::load(&root.join(&config.whitelist)),
        }
    }

    /// Whether the whitelist is present and therefore flips the default.
    pub fn include_mode_active(&self) -> bool {
        !self.aux_include.is_empty()
    }

    /// Decide whether a relative path is excluded.
    ///
    /// `relative_path` uses `/` separators; the scan root itself is the
    /// empty string.
    pub fn decide(&self, relative_path: &str, is_dir: bool) -> bool {
        // A primary exclusion can never be overridden by the whitelist.
        if self.base_exclude.evaluate(relative_path) == Some(true) {
            return true;
        }

        if !self.include_mode_active() {
            return self.aux_exclude.evaluate(relative_path) == Some(true);
        }

        if is_dir {
            // Directories are never hard-pruned in include mode unless no
            // whitelist rule could possibly match beneath them.
            return !self.dir_traversable(relative_path);
        }

        !matches!(self.aux_include.evaluate(relative_path), Some(true))
    }

    /// Whether a directory may still contain whitelisted descendants.
    ///
    /// Non-anchored rules float to any depth, so they can always match
    /// below this directory. Only a set made entirely of anchored rules
    /// that provably cannot reach beneath it prunes the subtree.
    fn dir_traversable(&self, relative_path: &str) -> bool {
        if relative_path.is_empty() {
            return true;
        }
        let prefix = format!("{}/", relative_path);
        self.aux_include.rules().iter().any(|rule| {
            !rule.anchored
                || rule.text() == relative_path
                || rule.text().starts_with(&prefix)
                || rule.spans_segments()
                || rule.matches(relative_path)
        })
    }
}
