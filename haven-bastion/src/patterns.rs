//! Shared pattern-matching infrastructure used by both the PHI scrubber and
//! the dangerous-command detector: a named category backed by one or more
//! compiled regexes, checked in declaration order.

use regex::Regex;
use std::sync::LazyLock;

/// A named family of regexes. `label` becomes the redaction-token category
/// for PHI categories, and the finding's `category` for dangerous-command
/// categories.
pub struct PatternCategory {
    pub label: &'static str,
    pub patterns: Vec<Regex>,
}

impl PatternCategory {
    pub fn new(label: &'static str, raw_patterns: &[&str]) -> Self {
        let patterns = raw_patterns
            .iter()
            .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid pattern for {label}: {e}")))
            .collect();
        Self { label, patterns }
    }

    pub fn find_all<'t>(&self, text: &'t str) -> Vec<regex::Match<'t>> {
        self.patterns
            .iter()
            .flat_map(|re| re.find_iter(text))
            .collect()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }
}

macro_rules! category {
    ($label:expr, [$($pat:expr),+ $(,)?]) => {
        PatternCategory::new($label, &[$($pat),+])
    };
}

pub(crate) use category;

/// Used by [`crate::phi`] to build a deterministic short token for a match
/// without leaking the matched substring itself.
pub fn short_digest(input: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, input.as_bytes());
    hex::encode(&digest.as_ref()[..4])
}

pub static IPV4_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b").unwrap()
});
