// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Engine failures that were already triaged as unactionable (driver quirks and the like).
///
/// Reporting every occurrence would flood the sink with noise nobody can fix, so a match diverts
/// the incident to the graceful-shutdown path. The set is built once from the configuration and
/// never changes afterwards, so reads need no synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownFailureSet {
    substrings: Vec<String>,
}

impl KnownFailureSet {
    pub fn new<I, S>(substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for s in substrings {
            set.push(s.into());
        }
        set
    }

    fn push(&mut self, substring: String) {
        if !substring.is_empty() && !self.substrings.contains(&substring) {
            self.substrings.push(substring);
        }
    }

    /// Plain, case-sensitive substring containment against the raw format string. The formatted
    /// message is deliberately not used: arguments vary between occurrences, the format does not.
    pub fn is_known(&self, raw_format: &str) -> bool {
        self.matching(raw_format).is_some()
    }

    /// The first configured entry contained in `raw_format`, in configuration order.
    pub fn matching(&self, raw_format: &str) -> Option<&str> {
        self.substrings
            .iter()
            .find(|known| raw_format.contains(known.as_str()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.substrings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.substrings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_match() {
        let set = KnownFailureSet::new(["Failed to recreate D3D11"]);
        assert!(set.is_known("Failed to recreate D3D11 device"));
        assert!(set.is_known("xFailed to recreate D3D11y"));
        assert!(!set.is_known("unrelated message"));
    }

    #[test]
    fn test_case_sensitive_and_unanchored() {
        let set = KnownFailureSet::new(["D3D11"]);
        assert!(!set.is_known("failed to recreate d3d11"));
        assert!(set.is_known("device lost: D3D11_ERROR"));
    }

    #[test]
    fn test_empty_set_knows_nothing() {
        let set = KnownFailureSet::default();
        assert!(set.is_empty());
        assert!(!set.is_known(""));
        assert!(!set.is_known("Failed to recreate D3D11"));
    }

    #[test]
    fn test_dedup_and_order() {
        let set = KnownFailureSet::new(["b", "a", "b", ""]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.matching("ab"), Some("b"));
    }
}
