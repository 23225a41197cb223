//! Storage key identifiers.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of checksum hex characters embedded in generated keys.
pub const CHECKSUM_PREFIX_LEN: usize = 16;

/// Maximum accepted key length (legacy keys included).
pub const MAX_KEY_LEN: usize = 128;

/// Opaque identifier for one stored artifact, independent of its filesystem path.
///
/// Generated keys have the form `<uuid simple>-<checksum hex prefix>`. Keys carried
/// over from older storage generations may use other shapes, so parsing only
/// enforces that the key is safe to embed in a file name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey(String);

impl StorageKey {
    /// Generate a fresh key for content with the given checksum.
    pub fn generate(checksum: &ContentHash) -> Self {
        Self(format!(
            "{}-{}",
            Uuid::new_v4().simple(),
            checksum.hex_prefix(CHECKSUM_PREFIX_LEN)
        ))
    }

    /// Parse and validate a key.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidStorageKey("empty key".to_string()));
        }
        if s.len() > MAX_KEY_LEN {
            return Err(crate::Error::InvalidStorageKey(format!(
                "key exceeds {MAX_KEY_LEN} characters"
            )));
        }
        if s.starts_with('.') {
            return Err(crate::Error::InvalidStorageKey(format!(
                "key must not start with '.': {s}"
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(crate::Error::InvalidStorageKey(format!(
                "invalid character {c:?} in key: {s}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fan-out directory used under `originals/` and `backup/`.
    pub fn shard(&self) -> &str {
        let end = self.0.char_indices().nth(2).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }

    /// The checksum prefix embedded in a generated key, if present.
    pub fn checksum_prefix(&self) -> Option<&str> {
        let (_, suffix) = self.0.rsplit_once('-')?;
        (suffix.len() == CHECKSUM_PREFIX_LEN && suffix.chars().all(|c| c.is_ascii_hexdigit()))
            .then_some(suffix)
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageKey({})", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StorageKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_embeds_checksum_prefix() {
        let checksum = ContentHash::compute(b"abc");
        let key = StorageKey::generate(&checksum);
        assert_eq!(key.checksum_prefix(), Some(&checksum.to_hex()[..16]));
        assert_eq!(key.as_str().len(), 32 + 1 + CHECKSUM_PREFIX_LEN);
        assert!(StorageKey::parse(key.as_str()).is_ok());
    }

    #[test]
    fn test_generated_keys_differ_for_same_content() {
        let checksum = ContentHash::compute(b"abc");
        assert_ne!(StorageKey::generate(&checksum), StorageKey::generate(&checksum));
    }

    #[test]
    fn test_parse_rejects_unsafe_keys() {
        for bad in ["", "../etc", "a/b", ".hidden", "a b", "x\\y"] {
            assert!(StorageKey::parse(bad).is_err(), "accepted {bad:?}");
        }
        assert!(StorageKey::parse(&"a".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_legacy_key_has_no_checksum_prefix() {
        let key = StorageKey::parse("legacy_42").unwrap();
        assert_eq!(key.checksum_prefix(), None);
        assert_eq!(key.shard(), "le");
    }

    #[test]
    fn test_serde_validates() {
        let key: StorageKey = serde_json::from_str("\"abc-def\"").unwrap();
        assert_eq!(key.as_str(), "abc-def");
        assert!(serde_json::from_str::<StorageKey>("\"../x\"").is_err());
    }
}
