//! File version repository trait.

use crate::error::MetadataResult;
use crate::models::{FileVersionRow, NewFileVersion};
use async_trait::async_trait;

/// Append-only history of superseded revisions.
#[async_trait]
pub trait VersionRepo: Send + Sync {
    async fn insert_version(&self, version: &NewFileVersion) -> MetadataResult<i64>;

    /// Versions of a lineage, oldest first.
    async fn list_versions(&self, storage_key: &str) -> MetadataResult<Vec<FileVersionRow>>;

    /// Move a lineage to its new head key. Returns rows moved.
    async fn reassign_versions(&self, from_key: &str, to_key: &str) -> MetadataResult<u64>;

    /// Remove a lineage, returning the removed rows.
    async fn delete_versions(&self, storage_key: &str) -> MetadataResult<Vec<FileVersionRow>>;

    /// Paths of every retained version.
    async fn all_version_paths(&self) -> MetadataResult<Vec<String>>;
}
