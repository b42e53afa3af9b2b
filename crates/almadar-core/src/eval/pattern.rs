//! Compiled regex patterns for `matches` and `validate/pattern`

use indexmap::IndexMap;
use regex::Regex;
use std::sync::RwLock;

/// Size-bounded regex cache keyed by pattern source
///
/// Invalid patterns are cached as `None` so they are reported once. When
/// full, the oldest inserted pattern is evicted.
pub struct PatternCache {
    capacity: usize,
    entries: RwLock<IndexMap<String, Option<Regex>>>,
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Whether `subject` matches `pattern`; an invalid pattern never matches
    pub fn is_match(&self, subject: &str, pattern: &str) -> bool {
        let cached = self
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(pattern).cloned());
        if let Some(compiled) = cached {
            return compiled.is_some_and(|re| re.is_match(subject));
        }

        let compiled = match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err, "Invalid regex pattern");
                None
            }
        };
        let matched = compiled.as_ref().is_some_and(|re| re.is_match(subject));
        self.insert(pattern, compiled);
        matched
    }

    fn insert(&self, pattern: &str, compiled: Option<Regex>) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            if entries.contains_key(pattern) {
                return;
            }
            while entries.len() >= self.capacity {
                entries.shift_remove_index(0);
            }
            entries.insert(pattern.to_string(), compiled);
        }
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(pattern))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile_once() {
        let cache = PatternCache::new(8);
        assert!(cache.is_match("abc-123", r"^[a-z]+-\d+$"));
        assert!(!cache.is_match("abc", r"^[a-z]+-\d+$"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_is_remembered() {
        let cache = PatternCache::new(8);
        assert!(!cache.is_match("(", "("));
        assert!(!cache.is_match("(", "("));
        assert!(cache.contains("("));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_oldest_pattern_is_evicted() {
        let cache = PatternCache::new(2);
        cache.is_match("a", "a");
        cache.is_match("b", "b");
        cache.is_match("c", "c");
        assert!(!cache.contains("a"));
        assert!(cache.contains("b") && cache.contains("c"));

        let disabled = PatternCache::new(0);
        assert!(disabled.is_match("x", "x"));
        assert!(disabled.is_empty());
    }
}
