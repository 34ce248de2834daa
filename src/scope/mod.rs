//! Scope Filter (C2): ordered inclusion/exclusion rule set over hosts and URLs.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MarasiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    Host,
    Url,
}

impl MatchType {
    fn as_str(&self) -> &'static str {
        match self {
            MatchType::Host => "host",
            MatchType::Url => "url",
        }
    }
}

struct CompiledRule {
    regex: Regex,
    match_type: MatchType,
}

/// Keyed by `pattern|matchType`; adding an identical key replaces the prior entry
/// (spec.md §4.2).
fn rule_key(pattern: &str, match_type: MatchType) -> String {
    format!("{pattern}|{}", match_type.as_str())
}

#[derive(Default)]
struct ScopeInner {
    include: HashMap<String, CompiledRule>,
    exclude: HashMap<String, CompiledRule>,
    default_allow: bool,
}

/// Shared, locked scope object (one per proxy instance, per spec.md §9 redesign
/// note — exposed only through this handle, never copied into scripts).
#[derive(Clone)]
pub struct Scope {
    inner: Arc<RwLock<ScopeInner>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            inner: Arc::new(RwLock::new(ScopeInner::default())),
        }
    }

    /// A pattern string beginning with `-` registers only in the exclude set,
    /// regardless of the `is_exclude` argument (spec.md §8 invariant 4).
    pub fn add_rule(&self, pattern: &str, match_type: MatchType, is_exclude: bool) -> Result<()> {
        let (is_exclude, pattern) = if let Some(stripped) = pattern.strip_prefix('-') {
            (true, stripped)
        } else {
            (is_exclude, pattern)
        };

        let regex = Regex::new(pattern)
            .map_err(|e| MarasiError::Config(format!("invalid scope pattern '{pattern}': {e}")))?;
        let key = rule_key(pattern, match_type);
        let compiled = CompiledRule { regex, match_type };

        let mut inner = self.inner.write();
        if is_exclude {
            inner.exclude.insert(key, compiled);
        } else {
            inner.include.insert(key, compiled);
        }
        Ok(())
    }

    pub fn remove_rule(&self, pattern: &str, match_type: MatchType, is_exclude: bool) {
        let key = rule_key(pattern, match_type);
        let mut inner = self.inner.write();
        if is_exclude {
            inner.exclude.remove(&key);
        } else {
            inner.include.remove(&key);
        }
    }

    pub fn clear_rules(&self) {
        let mut inner = self.inner.write();
        inner.include.clear();
        inner.exclude.clear();
    }

    pub fn set_default_allow(&self, allow: bool) {
        self.inner.write().default_allow = allow;
    }

    /// Evaluate a single string (host or URL) against rules of one match type.
    pub fn matches_string(&self, value: &str, match_type: MatchType) -> bool {
        let inner = self.inner.read();

        let excluded = inner
            .exclude
            .values()
            .filter(|r| r.match_type == match_type)
            .any(|r| r.regex.is_match(value));
        if excluded {
            return false;
        }

        let applicable_includes: Vec<_> = inner
            .include
            .values()
            .filter(|r| r.match_type == match_type)
            .collect();

        if applicable_includes.is_empty() {
            return inner.default_allow;
        }

        applicable_includes.iter().any(|r| r.regex.is_match(value))
    }

    /// Evaluate a transaction's host and url: exclude-first across both match
    /// types, matching iff no exclude rule fires and an applicable include rule
    /// fires (or default-allow governs when there are no applicable include rules
    /// for either match type) — spec.md §4.2 algorithm.
    pub fn matches(&self, host: &str, url: &str) -> bool {
        let inner = self.inner.read();

        let excluded = inner.exclude.values().any(|r| match r.match_type {
            MatchType::Host => r.regex.is_match(host),
            MatchType::Url => r.regex.is_match(url),
        });
        if excluded {
            return false;
        }

        if inner.include.is_empty() {
            return inner.default_allow;
        }

        inner.include.values().any(|r| match r.match_type {
            MatchType::Host => r.regex.is_match(host),
            MatchType::Url => r.regex.is_match(url),
        })
    }
}
