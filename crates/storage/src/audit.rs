//! Tamper-evident audit log.
//!
//! Each record's integrity hash covers its own fields and the previous
//! record's hash. Appends are serialized in-process, and the metadata store
//! takes its write lock before reading the chain tail, so separate processes
//! still extend one linear chain.

use crate::error::{StorageError, StorageResult};
use crate::fs;
use docvault_core::audit::{AuditCategory, AuditOperation, AuditResult, SecurityLevel};
use docvault_metadata::MetadataStore;
use docvault_metadata::models::{AuditDraft, AuditFilter, AuditRecordRow};
use docvault_metadata::repos::AuditRepo;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

const PAGE_SIZE: u32 = 500;

/// Result of recomputing the hash chain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainReport {
    pub verified_count: u64,
    pub tampered_count: u64,
    /// Records whose stored hash does not match their own fields.
    pub tampered_records: Vec<i64>,
    /// Records whose `prev_hash` does not match the preceding record.
    /// Only checked when the whole chain is verified.
    pub broken_links: Vec<i64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.tampered_records.is_empty() && self.broken_links.is_empty()
    }
}

/// Summary of an export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub records: u64,
    pub tampered: u64,
}

/// File format of an audit export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// One JSON object per line.
    #[default]
    JsonLines,
    /// Comma-separated values with a header row.
    Csv,
}

const CSV_HEADER: &str =
    "ID,Timestamp,Actor,Operation,Category,Subject,Details,Result,Security Level,Integrity\n";

#[derive(Serialize)]
struct ExportLine<'a> {
    #[serde(flatten)]
    record: &'a AuditRecordRow,
    category: Option<AuditCategory>,
    security_level: Option<SecurityLevel>,
    verified: bool,
}

/// Append-only audit log over the metadata store.
pub struct AuditLog {
    metadata: Arc<dyn MetadataStore>,
    append_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            metadata,
            append_lock: Mutex::new(()),
        }
    }

    /// Append a record and return it as persisted.
    pub async fn append(
        &self,
        operation: AuditOperation,
        subject_key: &str,
        actor_id: &str,
        result: AuditResult,
        detail: Option<&str>,
    ) -> StorageResult<AuditRecordRow> {
        let draft = AuditDraft {
            actor_id: actor_id.to_string(),
            operation: operation.as_str().to_string(),
            subject_key: subject_key.to_string(),
            result: result.as_str().to_string(),
            detail: detail.map(str::to_string),
            timestamp: OffsetDateTime::now_utc(),
        };
        let _guard = self.append_lock.lock().await;
        let record = self.metadata.append_audit_record(&draft).await?;
        tracing::debug!(
            id = record.id,
            operation = %operation,
            subject_key = %subject_key,
            result = %result,
            "Audit record appended"
        );
        Ok(record)
    }

    /// Append a record, logging instead of failing.
    pub async fn record(
        &self,
        operation: AuditOperation,
        subject_key: &str,
        actor_id: &str,
        result: AuditResult,
        detail: Option<&str>,
    ) {
        if let Err(e) = self
            .append(operation, subject_key, actor_id, result, detail)
            .await
        {
            tracing::error!(
                operation = %operation,
                subject_key = %subject_key,
                error = %e,
                "Failed to append audit record"
            );
        }
    }

    /// Recompute every record's hash, optionally restricted to one subject.
    ///
    /// Each record is checked against its own stored `prev_hash`, so a
    /// tampered field flags exactly that record.
    pub async fn verify_chain(&self, subject_key: Option<&str>) -> StorageResult<ChainReport> {
        let mut report = ChainReport::default();
        let check_links = subject_key.is_none();
        let mut previous_hash: Option<String> = None;
        let mut after_id = None;

        loop {
            let page = self
                .metadata
                .list_audit_records(&AuditFilter {
                    subject_key: subject_key.map(str::to_string),
                    after_id,
                    limit: Some(PAGE_SIZE),
                    ..AuditFilter::default()
                })
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = Some(last.id);

            for record in &page {
                if record.recompute_hash() == record.integrity_hash {
                    report.verified_count += 1;
                } else {
                    report.tampered_records.push(record.id);
                }
                if check_links {
                    if record.prev_hash != previous_hash {
                        report.broken_links.push(record.id);
                    }
                    previous_hash = Some(record.integrity_hash.clone());
                }
            }
            if page.len() < PAGE_SIZE as usize {
                break;
            }
        }

        report.tampered_count = report.tampered_records.len() as u64;
        if report.is_intact() {
            tracing::info!(verified = report.verified_count, "Audit chain intact");
        } else {
            tracing::warn!(
                verified = report.verified_count,
                tampered = report.tampered_count,
                broken_links = report.broken_links.len(),
                "Audit chain verification found tampering"
            );
        }
        Ok(report)
    }

    /// List records matching a filter.
    pub async fn list(&self, filter: &AuditFilter) -> StorageResult<Vec<AuditRecordRow>> {
        Ok(self.metadata.list_audit_records(filter).await?)
    }

    /// Write matching records to `dest`, each with its integrity verdict.
    pub async fn export(
        &self,
        filter: &AuditFilter,
        dest: &Path,
        format: ExportFormat,
    ) -> StorageResult<ExportSummary> {
        let mut out = Vec::new();
        let mut records = 0u64;
        let mut tampered = 0u64;
        let mut page_filter = filter.clone();
        let mut remaining = filter.limit;

        if format == ExportFormat::Csv {
            out.extend_from_slice(CSV_HEADER.as_bytes());
        }

        loop {
            let page_size = remaining.map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE));
            if page_size == 0 {
                break;
            }
            page_filter.limit = Some(page_size);
            let page = self.metadata.list_audit_records(&page_filter).await?;

            for record in &page {
                let operation = AuditOperation::from_str(&record.operation).ok();
                let verified = record.recompute_hash() == record.integrity_hash;
                if !verified {
                    tampered += 1;
                }
                let line = ExportLine {
                    record,
                    category: operation.map(|op| op.category()),
                    security_level: operation.map(|op| op.security_level()),
                    verified,
                };
                match format {
                    ExportFormat::JsonLines => {
                        serde_json::to_writer(&mut out, &line)
                            .map_err(|e| StorageError::WriteFailure(e.to_string()))?;
                        out.push(b'\n');
                    }
                    ExportFormat::Csv => out.extend_from_slice(csv_row(&line).as_bytes()),
                }
                records += 1;
            }

            remaining = remaining.map(|r| r.saturating_sub(page.len() as u32));
            match page.last() {
                Some(last) if page.len() == page_size as usize => {
                    page_filter.after_id = Some(last.id)
                }
                _ => break,
            }
        }

        fs::write_atomic(dest, &out).await.map_err(|e| {
            StorageError::WriteFailure(format!(
                "failed to write audit export {}: {e}",
                dest.display()
            ))
        })?;
        tracing::info!(
            path = %dest.display(),
            format = ?format,
            records,
            tampered,
            "Audit log exported"
        );
        Ok(ExportSummary {
            path: dest.to_path_buf(),
            records,
            tampered,
        })
    }
}

fn csv_row(line: &ExportLine<'_>) -> String {
    let record = line.record;
    let id = record.id.to_string();
    let fields = [
        id.as_str(),
        record.timestamp.as_str(),
        record.actor_id.as_str(),
        record.operation.as_str(),
        line.category.map_or("", |c| c.as_str()),
        record.subject_key.as_str(),
        record.detail.as_deref().unwrap_or(""),
        record.result.as_str(),
        line.security_level.map_or("", |l| l.as_str()),
        if line.verified { "true" } else { "false" },
    ];
    let mut row = fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}

/// Quote a field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
