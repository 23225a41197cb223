//! Audit record repository trait.

use crate::error::MetadataResult;
use crate::models::{AuditDraft, AuditFilter, AuditRecordRow};
use async_trait::async_trait;

/// Append-only, hash-chained audit storage.
#[async_trait]
pub trait AuditRepo: Send + Sync {
    /// Append a record, assigning the next sequential id and chaining it to
    /// the current tail.
    async fn append_audit_record(&self, draft: &AuditDraft) -> MetadataResult<AuditRecordRow>;

    /// Records matching the filter, ordered by id.
    async fn list_audit_records(&self, filter: &AuditFilter)
    -> MetadataResult<Vec<AuditRecordRow>>;

    async fn get_audit_record(&self, id: i64) -> MetadataResult<Option<AuditRecordRow>>;

    /// The record immediately preceding `id` in the chain.
    async fn get_audit_record_before(&self, id: i64) -> MetadataResult<Option<AuditRecordRow>>;

    async fn count_audit_records(&self) -> MetadataResult<u64>;
}
