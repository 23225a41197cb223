//! Storage index repository trait.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{IndexStats, StorageIndexEntry};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Durable mapping from storage key to stored file metadata.
#[async_trait]
pub trait IndexRepo: Send + Sync {
    /// Insert or replace an entry together with its backup paths.
    async fn put_entry(&self, entry: &StorageIndexEntry) -> MetadataResult<()>;

    /// Get an entry by storage key.
    async fn get_entry(&self, storage_key: &str) -> MetadataResult<Option<StorageIndexEntry>>;

    /// Get an entry, failing with `NotFound` when absent.
    async fn require_entry(&self, storage_key: &str) -> MetadataResult<StorageIndexEntry> {
        self.get_entry(storage_key)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("storage key {storage_key}")))
    }

    /// Check whether a key is taken.
    async fn entry_exists(&self, storage_key: &str) -> MetadataResult<bool>;

    /// Find the entry owned by a record.
    async fn get_entry_by_owner(&self, owner_id: &str)
    -> MetadataResult<Option<StorageIndexEntry>>;

    /// Record a location where the content was found.
    ///
    /// Idempotent: returns `false` when the path was already known.
    async fn record_alternate_path(&self, storage_key: &str, path: &str) -> MetadataResult<bool>;

    /// Snapshot of entries ordered by creation time, up to `limit`.
    async fn all_entries(&self, limit: Option<u32>) -> MetadataResult<Vec<StorageIndexEntry>>;

    /// Remove an entry and its recorded paths. Returns whether it existed.
    async fn delete_entry(&self, storage_key: &str) -> MetadataResult<bool>;

    /// Point the entry at a repaired primary copy.
    async fn set_primary_path(
        &self,
        storage_key: &str,
        primary_path: &str,
        restored_from: &str,
        restored_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Record a successful integrity check.
    async fn mark_verified(&self, storage_key: &str, at: OffsetDateTime) -> MetadataResult<()>;

    /// Flag or clear the unrecoverable marker.
    async fn set_unrecoverable(&self, storage_key: &str, unrecoverable: bool)
    -> MetadataResult<()>;

    /// Record the key of the current-generation copy.
    async fn mark_migrated(&self, storage_key: &str, migrated_to: &str) -> MetadataResult<()>;

    /// Set or clear the owning record id.
    async fn set_owner(&self, storage_key: &str, owner_id: Option<&str>) -> MetadataResult<()>;

    /// Every path the index knows about: primaries and recorded paths.
    async fn all_indexed_paths(&self) -> MetadataResult<Vec<String>>;

    /// Aggregate counts.
    async fn index_stats(&self) -> MetadataResult<IndexStats>;
}
