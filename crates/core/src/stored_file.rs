//! Stored file domain types.

use crate::hash::ContentHash;
use crate::storage_key::StorageKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

/// One physical artifact held by the content store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredFile {
    pub storage_key: StorageKey,
    /// User-supplied name, for display and download only.
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Absent for records inherited from older generations.
    pub checksum: Option<ContentHash>,
    pub primary_path: PathBuf,
    pub backup_paths: Vec<PathBuf>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_verified_at: Option<OffsetDateTime>,
}

impl StoredFile {
    /// Primary followed by backups, in resolution order.
    pub fn copies(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.primary_path).chain(self.backup_paths.iter())
    }
}

/// Identifies a record that predates storage keys.
///
/// Resolution of a hint never rewrites anything; migration moves such records
/// into the current generation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyHint {
    /// Bare file name as recorded by the owning record.
    pub filename: String,
    /// Path recorded by the owning record, if any.
    pub recorded_path: Option<PathBuf>,
    /// Owning record id, for audit subjects.
    pub record_id: Option<String>,
}

impl LegacyHint {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    pub fn with_recorded_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.recorded_path = Some(path.into());
        self
    }

    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }

    /// Subject used in audit records for this hint.
    pub fn subject(&self) -> String {
        match &self.record_id {
            Some(id) => format!("record:{id}"),
            None => format!("legacy:{}", self.filename),
        }
    }
}
