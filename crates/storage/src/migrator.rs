//! Moving owning records onto the current storage generation.

use crate::audit::AuditLog;
use crate::content_store::ContentStore;
use crate::error::{StorageError, StorageResult};
use crate::fs;
use crate::layout::StorageLayout;
use crate::resolver::{Resolver, legacy_hint};
use docvault_core::audit::{AuditOperation, AuditResult};
use docvault_core::filename::strip_unique_prefix;
use docvault_core::storage_key::StorageKey;
use docvault_core::stored_file::LegacyHint;
use docvault_metadata::MetadataStore;
use docvault_metadata::models::{OwningRecordRow, StorageIndexEntry};
use docvault_metadata::repos::{IndexRepo, RecordRepo, VersionRepo};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;

const SCAN_PAGE: u32 = 200;

/// A record that could not be migrated.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationFailure {
    pub record_id: String,
    pub reason: String,
}

/// Summary of one migration batch.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Records that needed migration and were attempted.
    pub total: u64,
    pub migrated: u64,
    pub failed: u64,
    /// Records already on the current generation.
    pub already_current: u64,
    pub errors: Vec<MigrationFailure>,
    /// Last record examined; pass it back to continue scanning after it.
    pub next_cursor: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

enum Plan {
    Current,
    /// Copied and marked earlier, but the record still points at the old key.
    Resume { old_key: String, new_key: String },
    Keyed(StorageIndexEntry),
    /// The record references a key the index does not know.
    Dangling(String),
    Legacy(LegacyHint),
    /// Nothing recorded to migrate.
    Empty,
}

/// Migrates records in bounded batches.
pub struct Migrator {
    metadata: Arc<dyn MetadataStore>,
    layout: StorageLayout,
    store: Arc<ContentStore>,
    resolver: Arc<Resolver>,
    audit: Arc<AuditLog>,
}

impl Migrator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        store: Arc<ContentStore>,
        resolver: Arc<Resolver>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            layout: store.layout().clone(),
            metadata,
            store,
            resolver,
            audit,
        }
    }

    /// Migrate up to `batch_size` records, resuming where the previous call stopped.
    ///
    /// The cursor is kept in the metadata store, so records that keep failing
    /// cannot hold back the ones after them. After the last record the next
    /// call starts over, which is when failed records are retried.
    pub async fn migrate_batch(&self, actor: &str, batch_size: u32) -> StorageResult<MigrationReport> {
        let saved = self.metadata.migration_cursor().await?;
        let report = self
            .migrate_batch_after(actor, batch_size, saved.as_deref())
            .await?;
        self.metadata
            .set_migration_cursor(report.next_cursor.as_deref())
            .await?;
        tracing::debug!(
            from = ?saved,
            next = ?report.next_cursor,
            "Migration cursor advanced"
        );
        Ok(report)
    }

    /// Migrate up to `batch_size` records with ids greater than `after`.
    ///
    /// A failing record does not stop the batch. Re-running is safe: records
    /// already on the current generation are counted and skipped.
    pub async fn migrate_batch_after(
        &self,
        actor: &str,
        batch_size: u32,
        after: Option<&str>,
    ) -> StorageResult<MigrationReport> {
        let mut report = MigrationReport {
            total: 0,
            migrated: 0,
            failed: 0,
            already_current: 0,
            errors: Vec::new(),
            next_cursor: None,
            started_at: OffsetDateTime::now_utc(),
            finished_at: OffsetDateTime::now_utc(),
        };
        let mut cursor = after.map(str::to_string);

        'scan: loop {
            let page = self
                .metadata
                .list_records(cursor.as_deref(), SCAN_PAGE)
                .await?;
            let exhausted = page.len() < SCAN_PAGE as usize;

            for record in page {
                if report.total >= u64::from(batch_size) {
                    break 'scan;
                }
                cursor = Some(record.record_id.clone());

                match self.plan(&record).await? {
                    Plan::Current => report.already_current += 1,
                    Plan::Empty => {}
                    plan => {
                        report.total += 1;
                        match self.execute(&record, plan).await {
                            Ok(new_key) => {
                                report.migrated += 1;
                                let detail = format!("record {} now at {new_key}", record.record_id);
                                self.audit
                                    .record(
                                        AuditOperation::Migrate,
                                        &new_key,
                                        actor,
                                        AuditResult::Success,
                                        Some(&detail),
                                    )
                                    .await;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    record_id = %record.record_id,
                                    error = %e,
                                    "Record migration failed"
                                );
                                report.failed += 1;
                                report.errors.push(MigrationFailure {
                                    record_id: record.record_id.clone(),
                                    reason: e.to_string(),
                                });
                                let subject = record
                                    .storage_key
                                    .clone()
                                    .unwrap_or_else(|| format!("record:{}", record.record_id));
                                self.audit
                                    .record(
                                        AuditOperation::Migrate,
                                        &subject,
                                        actor,
                                        AuditResult::Failure,
                                        Some(&e.to_string()),
                                    )
                                    .await;
                            }
                        }
                    }
                }
            }

            if exhausted {
                cursor = None;
                break;
            }
        }

        report.next_cursor = cursor;
        report.finished_at = OffsetDateTime::now_utc();
        tracing::info!(
            total = report.total,
            migrated = report.migrated,
            failed = report.failed,
            already_current = report.already_current,
            "Migration batch completed"
        );
        Ok(report)
    }

    async fn plan(&self, record: &OwningRecordRow) -> StorageResult<Plan> {
        let Some(key) = record.storage_key.as_deref() else {
            return Ok(legacy_hint(record).map_or(Plan::Empty, Plan::Legacy));
        };
        let Some(entry) = self.metadata.get_entry(key).await? else {
            return Ok(Plan::Dangling(key.to_string()));
        };
        if let Some(new_key) = entry.migrated_to.clone() {
            return Ok(Plan::Resume {
                old_key: entry.storage_key,
                new_key,
            });
        }
        if self.layout.is_canonical(Path::new(&entry.primary_path)) {
            return Ok(Plan::Current);
        }
        Ok(Plan::Keyed(entry))
    }

    /// Carry out a plan, returning the record's new storage key.
    async fn execute(&self, record: &OwningRecordRow, plan: Plan) -> StorageResult<String> {
        match plan {
            Plan::Resume { old_key, new_key } => {
                let key = StorageKey::parse(&new_key)?;
                self.metadata.reassign_versions(&old_key, &new_key).await?;
                self.store.assign_owner(&record.record_id, &key).await?;
                Ok(new_key)
            }
            Plan::Keyed(entry) => {
                let old_key = StorageKey::parse(&entry.storage_key)?;
                let found = self.resolver.locate_key(&old_key).await?;
                let stored = self
                    .store
                    .store(&found.content, &entry.original_name, None)
                    .await?;
                let new_key = stored.storage_key.to_string();
                self.metadata
                    .mark_migrated(old_key.as_str(), &new_key)
                    .await?;
                self.metadata
                    .reassign_versions(old_key.as_str(), &new_key)
                    .await?;
                self.store
                    .assign_owner(&record.record_id, &stored.storage_key)
                    .await?;
                Ok(new_key)
            }
            Plan::Legacy(hint) => {
                let found = self.resolver.locate_hint(&hint).await?;
                let name = strip_unique_prefix(&hint.filename).unwrap_or(&hint.filename);
                let stored = self.store.store(&found.content, name, None).await?;
                self.store
                    .assign_owner(&record.record_id, &stored.storage_key)
                    .await?;
                Ok(stored.storage_key.to_string())
            }
            Plan::Dangling(key) => Err(StorageError::NotFound(format!(
                "storage key {key} referenced by record {} is not indexed",
                record.record_id
            ))),
            Plan::Current | Plan::Empty => Err(StorageError::InvalidRecord(format!(
                "record {} needs no migration",
                record.record_id
            ))),
        }
    }
}

/// Write a plain-text migration report into `dir`, returning its path.
pub async fn write_report(report: &MigrationReport, dir: &Path) -> StorageResult<PathBuf> {
    let mut text = String::new();
    let _ = writeln!(text, "Migration report");
    let _ = writeln!(text, "started:          {}", report.started_at);
    let _ = writeln!(text, "finished:         {}", report.finished_at);
    let _ = writeln!(text, "total:            {}", report.total);
    let _ = writeln!(text, "migrated:         {}", report.migrated);
    let _ = writeln!(text, "failed:           {}", report.failed);
    let _ = writeln!(text, "already current:  {}", report.already_current);
    if let Some(cursor) = &report.next_cursor {
        let _ = writeln!(text, "next cursor:      {cursor}");
    }
    if !report.errors.is_empty() {
        let _ = writeln!(text, "\nFailures:");
        for failure in &report.errors {
            let _ = writeln!(text, "  {}: {}", failure.record_id, failure.reason);
        }
    }

    let path = dir.join(format!(
        "migration-{}.txt",
        report.finished_at.unix_timestamp_nanos() / 1_000
    ));
    fs::write_atomic(&path, text.as_bytes())
        .await
        .map_err(|e| {
            StorageError::WriteFailure(format!(
                "failed to write migration report {}: {e}",
                path.display()
            ))
        })?;
    Ok(path)
}
