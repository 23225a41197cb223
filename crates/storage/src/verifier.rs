//! Integrity verification of stored files.

use crate::audit::AuditLog;
use crate::error::{StorageError, StorageResult};
use crate::fs::{self, Probe};
use crate::resolver::{Resolver, expected_checksum};
use docvault_core::audit::{AuditOperation, AuditResult};
use docvault_core::hash::ContentHash;
use docvault_core::storage_key::StorageKey;
use docvault_metadata::MetadataStore;
use docvault_metadata::models::StorageIndexEntry;
use docvault_metadata::repos::IndexRepo;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use time::OffsetDateTime;

/// Outcome of verifying one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Ok,
    Repaired,
    Failed(String),
    /// Superseded by a migrated copy; not checked.
    Skipped,
}

/// A verification failure.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyFailure {
    pub storage_key: String,
    pub reason: String,
}

/// Summary of a verification run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub ok_count: u64,
    pub repaired_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub failures: Vec<VerifyFailure>,
}

impl VerifyReport {
    pub fn checked(&self) -> u64 {
        self.ok_count + self.repaired_count + self.failed_count
    }
}

/// Recomputes checksums and repairs what it can.
pub struct IntegrityVerifier {
    metadata: Arc<dyn MetadataStore>,
    resolver: Arc<Resolver>,
    audit: Arc<AuditLog>,
}

impl IntegrityVerifier {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        resolver: Arc<Resolver>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            metadata,
            resolver,
            audit,
        }
    }

    /// Verify up to `limit` entries in creation order.
    ///
    /// Entries whose primary matches are only marked verified, so an
    /// immediate second run reports everything ok and repairs nothing.
    pub async fn verify_all(&self, actor: &str, limit: Option<u32>) -> StorageResult<VerifyReport> {
        let entries = self.metadata.all_entries(limit).await?;
        let mut report = VerifyReport::default();

        for entry in &entries {
            let outcome = self.verify_entry(actor, entry).await?;
            match outcome {
                VerifyOutcome::Ok => report.ok_count += 1,
                VerifyOutcome::Repaired => report.repaired_count += 1,
                VerifyOutcome::Skipped => report.skipped_count += 1,
                VerifyOutcome::Failed(reason) => {
                    report.failed_count += 1;
                    report.failures.push(VerifyFailure {
                        storage_key: entry.storage_key.clone(),
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            ok = report.ok_count,
            repaired = report.repaired_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            "Verification completed"
        );
        Ok(report)
    }

    /// Verify a single entry.
    pub async fn verify_one(&self, actor: &str, key: &StorageKey) -> StorageResult<VerifyOutcome> {
        let entry = self.metadata.require_entry(key.as_str()).await?;
        self.verify_entry(actor, &entry).await
    }

    /// Index failures abort; file-level failures become outcomes.
    async fn verify_entry(
        &self,
        actor: &str,
        entry: &StorageIndexEntry,
    ) -> StorageResult<VerifyOutcome> {
        if entry.migrated_to.is_some() {
            return Ok(VerifyOutcome::Skipped);
        }

        let expected = match expected_checksum(entry) {
            Ok(expected) => expected,
            Err(e) => return self.fail(actor, entry, e.to_string()).await,
        };

        if primary_matches(Path::new(&entry.primary_path), expected.as_ref()).await {
            self.metadata
                .mark_verified(&entry.storage_key, OffsetDateTime::now_utc())
                .await?;
            self.audit
                .record(
                    AuditOperation::Verify,
                    &entry.storage_key,
                    actor,
                    AuditResult::Success,
                    None,
                )
                .await;
            return Ok(VerifyOutcome::Ok);
        }

        let key = match StorageKey::parse(&entry.storage_key) {
            Ok(key) => key,
            Err(e) => return self.fail(actor, entry, e.to_string()).await,
        };
        match self.resolver.resolve(&key).await {
            Ok(resolution) => {
                self.metadata
                    .mark_verified(&entry.storage_key, OffsetDateTime::now_utc())
                    .await?;
                let detail = format!("restored from {}", resolution.found_at.display());
                self.audit
                    .record(
                        AuditOperation::Repair,
                        &entry.storage_key,
                        actor,
                        AuditResult::Success,
                        Some(&detail),
                    )
                    .await;
                Ok(VerifyOutcome::Repaired)
            }
            Err(e) if is_index_failure(&e) => Err(e),
            Err(e) => self.fail(actor, entry, e.to_string()).await,
        }
    }

    async fn fail(
        &self,
        actor: &str,
        entry: &StorageIndexEntry,
        reason: String,
    ) -> StorageResult<VerifyOutcome> {
        tracing::warn!(storage_key = %entry.storage_key, reason = %reason, "Entry is unrecoverable");
        self.metadata
            .set_unrecoverable(&entry.storage_key, true)
            .await?;
        self.audit
            .record(
                AuditOperation::Verify,
                &entry.storage_key,
                actor,
                AuditResult::Failure,
                Some(&reason),
            )
            .await;
        Ok(VerifyOutcome::Failed(reason))
    }
}

async fn primary_matches(path: &Path, expected: Option<&ContentHash>) -> bool {
    match fs::probe(path).await {
        Probe::Found(data) => expected.is_none_or(|e| &ContentHash::compute(&data) == e),
        Probe::Missing | Probe::Unreadable(_) => false,
    }
}

fn is_index_failure(err: &StorageError) -> bool {
    matches!(
        err,
        StorageError::Metadata(_) | StorageError::IndexCorrupt(_)
    )
}
