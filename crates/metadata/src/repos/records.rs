//! Owning record repository trait.

use crate::error::MetadataResult;
use crate::models::OwningRecordRow;
use async_trait::async_trait;

/// References held by external document records.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    /// Insert or replace a record reference.
    async fn upsert_record(&self, record: &OwningRecordRow) -> MetadataResult<()>;

    async fn get_record(&self, record_id: &str) -> MetadataResult<Option<OwningRecordRow>>;

    async fn get_record_by_key(&self, storage_key: &str)
    -> MetadataResult<Option<OwningRecordRow>>;

    /// Records ordered by id, starting after `after` (exclusive).
    async fn list_records(
        &self,
        after: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<OwningRecordRow>>;

    /// Point a record at a new storage key.
    async fn update_record_reference(
        &self,
        record_id: &str,
        storage_key: &str,
    ) -> MetadataResult<()>;

    /// Drop the reference to a deleted key. Returns the number of records touched.
    async fn clear_record_reference(&self, storage_key: &str) -> MetadataResult<u64>;

    /// Record id where the last resumable migration batch stopped.
    async fn migration_cursor(&self) -> MetadataResult<Option<String>>;

    /// Save (or clear, with `None`) the resumable migration cursor.
    async fn set_migration_cursor(&self, cursor: Option<&str>) -> MetadataResult<()>;
}
