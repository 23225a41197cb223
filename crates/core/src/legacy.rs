//! Legacy storage location descriptors.
//!
//! Older storage generations left files in a handful of directories with
//! differing naming conventions. Each location is described as data (a
//! directory plus the matching rules allowed there) and the resolver walks the
//! configured list in order.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which file name matching rules apply in a legacy location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Only an exact file name match.
    Exact,
    /// Only a match on the name with its unique prefix stripped.
    StrippedPrefix,
    /// Exact first, then stripped prefix.
    #[default]
    Any,
}

impl MatchStrategy {
    pub fn allows_exact(&self) -> bool {
        matches!(self, Self::Exact | Self::Any)
    }

    pub fn allows_stripped(&self) -> bool {
        matches!(self, Self::StrippedPrefix | Self::Any)
    }
}

/// One historical storage directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyLocation {
    /// Directory to search (not recursed).
    pub path: PathBuf,
    /// Matching rules for this directory.
    #[serde(default)]
    pub strategy: MatchStrategy,
}

impl LegacyLocation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            strategy: MatchStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// How well a directory entry matches a stripped name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StrippedMatch {
    /// Entry name ends with the stripped name.
    Suffix,
    /// Entry name merely contains the stripped name.
    Substring,
}

/// Compare a directory entry against a target whose unique prefix was stripped.
pub fn match_stripped(entry_name: &str, stripped: &str) -> Option<StrippedMatch> {
    if stripped.is_empty() {
        None
    } else if entry_name.ends_with(stripped) {
        Some(StrippedMatch::Suffix)
    } else if entry_name.contains(stripped) {
        Some(StrippedMatch::Substring)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_defaults_to_any() {
        let loc: LegacyLocation = serde_json::from_str(r#"{"path": "/srv/uploads"}"#).unwrap();
        assert_eq!(loc.strategy, MatchStrategy::Any);
        assert!(loc.strategy.allows_exact());
        assert!(loc.strategy.allows_stripped());
    }

    #[test]
    fn test_strategy_snake_case() {
        let loc: LegacyLocation =
            serde_json::from_str(r#"{"path": "/a", "strategy": "stripped_prefix"}"#).unwrap();
        assert!(!loc.strategy.allows_exact());
        assert!(loc.strategy.allows_stripped());
    }

    #[test]
    fn test_match_stripped() {
        assert_eq!(
            match_stripped("1234abcd-99_invoice.pdf", "invoice.pdf"),
            Some(StrippedMatch::Suffix)
        );
        assert_eq!(
            match_stripped("invoice.pdf.bak", "invoice.pdf"),
            Some(StrippedMatch::Substring)
        );
        assert_eq!(match_stripped("receipt.pdf", "invoice.pdf"), None);
        assert_eq!(match_stripped("anything", ""), None);
        assert!(StrippedMatch::Suffix < StrippedMatch::Substring);
    }
}
