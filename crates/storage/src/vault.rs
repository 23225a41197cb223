//! The storage subsystem facade.
//!
//! Every operation takes the acting user's id and leaves an audit record,
//! success or failure, before it returns.

use crate::audit::AuditLog;
use crate::content_store::{ContentStore, DeleteReport, StorageStats};
use crate::error::{StorageError, StorageResult};
use crate::fs;
use crate::layout::StorageLayout;
use crate::migrator::{self, MigrationReport, Migrator};
use crate::resolver::{Resolution, Resolver};
use crate::sweep::{self, SweepReport};
use crate::verifier::{IntegrityVerifier, VerifyOutcome, VerifyReport};
use bytes::Bytes;
use docvault_core::audit::{AuditOperation, AuditResult};
use docvault_core::config::AppConfig;
use docvault_core::storage_key::StorageKey;
use docvault_core::stored_file::{LegacyHint, StoredFile};
use docvault_metadata::MetadataStore;
use docvault_metadata::models::FileVersionRow;
use std::path::PathBuf;
use std::sync::Arc;

/// Audit subject for operations that span many files.
const BATCH_SUBJECT: &str = "batch";

/// Document storage with redundancy, recovery and auditing.
pub struct Vault {
    config: AppConfig,
    metadata: Arc<dyn MetadataStore>,
    layout: StorageLayout,
    store: Arc<ContentStore>,
    resolver: Arc<Resolver>,
    verifier: IntegrityVerifier,
    migrator: Migrator,
    audit: Arc<AuditLog>,
}

impl Vault {
    /// Open the vault described by `config`.
    ///
    /// Fails with `IndexCorrupt` if the index database is damaged. Interrupted
    /// temp files older than the configured grace are removed.
    pub async fn open(config: AppConfig) -> StorageResult<Self> {
        config.validate().map_err(StorageError::Config)?;
        let metadata = docvault_metadata::from_config(&config.metadata).await?;
        Self::with_metadata(config, metadata).await
    }

    /// Open the vault over an already opened metadata store.
    pub async fn with_metadata(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
    ) -> StorageResult<Self> {
        config.validate().map_err(StorageError::Config)?;
        let layout = StorageLayout::new(&config.storage).map_err(|e| {
            StorageError::Config(format!(
                "invalid storage root {}: {e}",
                config.storage.root.display()
            ))
        })?;

        for dir in layout.managed_dirs() {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                StorageError::StorageUnavailable(format!(
                    "failed to create {}: {e}",
                    dir.display()
                ))
            })?;
            let recovered = fs::recover_temp_files(&dir, config.storage.temp_file_grace()).await;
            for error in &recovered.errors {
                tracing::warn!(dir = %dir.display(), error = %error, "Temp file recovery error");
            }
        }

        let store = Arc::new(ContentStore::new(
            layout.clone(),
            metadata.clone(),
            config.storage.backup_write_timeout(),
            config.storage.key_attempts,
        ));
        let resolver = Arc::new(Resolver::new(
            layout.clone(),
            metadata.clone(),
            config.legacy.locations.clone(),
            &config.search,
        ));
        let audit = Arc::new(AuditLog::new(metadata.clone()));
        let verifier = IntegrityVerifier::new(metadata.clone(), resolver.clone(), audit.clone());
        let migrator = Migrator::new(
            metadata.clone(),
            store.clone(),
            resolver.clone(),
            audit.clone(),
        );

        tracing::info!(
            root = %layout.root().display(),
            backups = layout.backup_roots().len(),
            legacy_locations = config.legacy.locations.len(),
            "Vault opened"
        );
        Ok(Self {
            config,
            metadata,
            layout,
            store,
            resolver,
            verifier,
            migrator,
            audit,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// The metadata store, for registering owning records.
    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Store new content, optionally on behalf of an owning record.
    pub async fn store(
        &self,
        actor: &str,
        data: &[u8],
        original_name: &str,
        owner: Option<&str>,
    ) -> StorageResult<StoredFile> {
        let result = self.store.store(data, original_name, owner).await;
        match &result {
            Ok(stored) => {
                self.record_success(AuditOperation::Store, stored.storage_key.as_str(), actor, None)
                    .await
            }
            Err(e) => {
                let subject = format!("upload:{original_name}");
                self.record_failure(AuditOperation::Store, &subject, actor, e)
                    .await
            }
        }
        result
    }

    /// Replace the content of a stored file, keeping the old bytes as a version.
    pub async fn update(
        &self,
        actor: &str,
        key: &StorageKey,
        data: &[u8],
    ) -> StorageResult<StoredFile> {
        let result = async {
            let current = self.resolver.resolve(key).await?;
            self.store.update(key, data, &current.path).await
        }
        .await;
        match &result {
            Ok(stored) => {
                let detail = format!("replaced by {}", stored.storage_key);
                self.record_success(AuditOperation::Update, key.as_str(), actor, Some(&detail))
                    .await
            }
            Err(e) => {
                self.record_failure(AuditOperation::Update, key.as_str(), actor, e)
                    .await
            }
        }
        result
    }

    /// Locate a verified copy, repairing the primary if it was lost.
    pub async fn resolve(&self, actor: &str, key: &StorageKey) -> StorageResult<Resolution> {
        let result = self.resolver.resolve(key).await;
        self.record_retrieve(actor, key.as_str(), &result).await;
        result
    }

    /// Locate a copy for a record that predates storage keys.
    pub async fn resolve_legacy(
        &self,
        actor: &str,
        hint: &LegacyHint,
    ) -> StorageResult<Resolution> {
        let result = self.resolver.resolve_legacy(hint).await;
        let subject = subject_of(&result, || hint.subject());
        self.record_retrieve(actor, &subject, &result).await;
        result
    }

    /// Locate the file an owning record references.
    pub async fn resolve_record(&self, actor: &str, record_id: &str) -> StorageResult<Resolution> {
        let result = self.resolver.resolve_record(record_id).await;
        let subject = subject_of(&result, || format!("record:{record_id}"));
        self.record_retrieve(actor, &subject, &result).await;
        result
    }

    /// Read verified content.
    pub async fn read(&self, actor: &str, key: &StorageKey) -> StorageResult<Bytes> {
        self.resolve(actor, key).await.map(|r| r.content)
    }

    /// Delete a stored file and its history.
    pub async fn delete(&self, actor: &str, key: &StorageKey) -> StorageResult<DeleteReport> {
        let result = self.store.delete(key).await;
        match &result {
            Ok(report) => {
                let detail = (!report.errors.is_empty())
                    .then(|| format!("{} copies could not be removed", report.errors.len()));
                self.record_success(AuditOperation::Delete, key.as_str(), actor, detail.as_deref())
                    .await
            }
            Err(e) => {
                self.record_failure(AuditOperation::Delete, key.as_str(), actor, e)
                    .await
            }
        }
        result
    }

    /// Verify up to `limit` entries, or the configured default.
    pub async fn verify_all(&self, actor: &str, limit: Option<u32>) -> StorageResult<VerifyReport> {
        let limit = limit.unwrap_or(self.config.maintenance.verify_limit);
        let result = self.verifier.verify_all(actor, Some(limit)).await;
        match &result {
            Ok(report) => {
                let detail = format!(
                    "ok={} repaired={} failed={} skipped={}",
                    report.ok_count, report.repaired_count, report.failed_count, report.skipped_count
                );
                let outcome = if report.failed_count == 0 {
                    AuditResult::Success
                } else {
                    AuditResult::Failure
                };
                self.audit
                    .record(AuditOperation::Verify, BATCH_SUBJECT, actor, outcome, Some(&detail))
                    .await
            }
            Err(e) => {
                self.record_failure(AuditOperation::Verify, BATCH_SUBJECT, actor, e)
                    .await
            }
        }
        result
    }

    /// Verify a single entry.
    pub async fn verify_one(&self, actor: &str, key: &StorageKey) -> StorageResult<VerifyOutcome> {
        let result = self.verifier.verify_one(actor, key).await;
        // Completed checks are recorded by the verifier itself.
        if let Err(e) = &result {
            self.record_failure(AuditOperation::Verify, key.as_str(), actor, e)
                .await;
        }
        result
    }

    /// Migrate one batch of records, using the configured size when `batch_size` is `None`.
    ///
    /// Each call continues where the previous one stopped and wraps around
    /// after the last record.
    pub async fn migrate_batch(
        &self,
        actor: &str,
        batch_size: Option<u32>,
    ) -> StorageResult<MigrationReport> {
        let batch_size = batch_size.unwrap_or(self.config.maintenance.migrate_batch_size);
        let result = self.migrator.migrate_batch(actor, batch_size).await;
        self.record_migration(actor, &result).await;
        result
    }

    /// Migrate one batch of records with ids greater than `after`.
    ///
    /// Explicit cursors leave the saved resume point untouched.
    pub async fn migrate_batch_after(
        &self,
        actor: &str,
        batch_size: Option<u32>,
        after: Option<&str>,
    ) -> StorageResult<MigrationReport> {
        let batch_size = batch_size.unwrap_or(self.config.maintenance.migrate_batch_size);
        let result = self
            .migrator
            .migrate_batch_after(actor, batch_size, after)
            .await;
        self.record_migration(actor, &result).await;
        result
    }

    /// Write a migration report into the configured report directory.
    pub async fn write_migration_report(
        &self,
        report: &MigrationReport,
    ) -> StorageResult<Option<PathBuf>> {
        match &self.config.maintenance.report_dir {
            Some(dir) => migrator::write_report(report, dir).await.map(Some),
            None => Ok(None),
        }
    }

    /// Remove unreferenced files older than the configured grace period.
    pub async fn sweep_orphans(&self, actor: &str, dry_run: bool) -> StorageResult<SweepReport> {
        let result = sweep::sweep_orphans(
            &self.layout,
            self.metadata.as_ref(),
            self.config.maintenance.orphan_grace_period(),
            dry_run,
        )
        .await;
        match &result {
            Ok(report) => {
                let detail = format!(
                    "dry_run={} scanned={} deleted={} bytes={} errors={}",
                    report.dry_run,
                    report.scanned,
                    report.deleted,
                    report.bytes_reclaimed,
                    report.errors.len()
                );
                self.record_success(AuditOperation::Delete, "orphans", actor, Some(&detail))
                    .await
            }
            Err(e) => {
                self.record_failure(AuditOperation::Delete, "orphans", actor, e)
                    .await
            }
        }
        result
    }

    pub async fn stats(&self) -> StorageResult<StorageStats> {
        self.store.stats().await
    }

    /// Recorded metadata of a stored file, without touching its copies.
    pub async fn describe(&self, key: &StorageKey) -> StorageResult<StoredFile> {
        self.store.describe(key).await
    }

    /// Retained revisions of a key, oldest first.
    pub async fn versions(&self, key: &StorageKey) -> StorageResult<Vec<FileVersionRow>> {
        self.store.versions(key).await
    }

    async fn record_migration(&self, actor: &str, result: &StorageResult<MigrationReport>) {
        match result {
            Ok(report) => {
                let detail = format!(
                    "total={} migrated={} failed={} already_current={}",
                    report.total, report.migrated, report.failed, report.already_current
                );
                let outcome = if report.failed == 0 {
                    AuditResult::Success
                } else {
                    AuditResult::Failure
                };
                self.audit
                    .record(AuditOperation::Migrate, BATCH_SUBJECT, actor, outcome, Some(&detail))
                    .await
            }
            Err(e) => {
                self.record_failure(AuditOperation::Migrate, BATCH_SUBJECT, actor, e)
                    .await
            }
        }
    }

    async fn record_retrieve(
        &self,
        actor: &str,
        subject: &str,
        result: &StorageResult<Resolution>,
    ) {
        match result {
            Ok(resolution) => {
                self.record_success(AuditOperation::Retrieve, subject, actor, None)
                    .await;
                if resolution.repaired {
                    let detail = format!("restored from {}", resolution.found_at.display());
                    self.record_success(AuditOperation::Repair, subject, actor, Some(&detail))
                        .await;
                }
            }
            Err(e) => {
                self.record_failure(AuditOperation::Retrieve, subject, actor, e)
                    .await
            }
        }
    }

    async fn record_success(
        &self,
        operation: AuditOperation,
        subject: &str,
        actor: &str,
        detail: Option<&str>,
    ) {
        self.audit
            .record(operation, subject, actor, AuditResult::Success, detail)
            .await;
    }

    async fn record_failure(
        &self,
        operation: AuditOperation,
        subject: &str,
        actor: &str,
        error: &StorageError,
    ) {
        let detail = format!("{}: {error}", error.kind());
        self.audit
            .record(operation, subject, actor, AuditResult::Failure, Some(&detail))
            .await;
    }
}

/// Audit subject for a resolution: its storage key when it has one.
fn subject_of(result: &StorageResult<Resolution>, fallback: impl FnOnce() -> String) -> String {
    match result {
        Ok(Resolution {
            storage_key: Some(key),
            ..
        }) => key.to_string(),
        _ => fallback(),
    }
}
