//! Orphaned file cleanup.
//!
//! Files under the managed tree that no index entry or version row points at
//! are deleted once they are older than the grace period. Recent orphans are
//! kept since they may belong to a store that has not registered yet.

use crate::error::{StorageError, StorageResult};
use crate::fs::{self, WalkedFile};
use crate::layout::StorageLayout;
use docvault_metadata::MetadataStore;
use docvault_metadata::repos::{IndexRepo, VersionRepo};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::SystemTime;

/// Summary of an orphan sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub scanned: u64,
    pub orphans: u64,
    pub deleted: u64,
    pub kept_recent: u64,
    pub bytes_reclaimed: u64,
    pub errors: Vec<String>,
}

enum Disposition {
    Referenced,
    Recent,
    Deleted(u64),
    WouldDelete(u64),
    Error(String),
}

/// Walk the managed tree and remove unreferenced files.
pub async fn sweep_orphans(
    layout: &StorageLayout,
    metadata: &dyn MetadataStore,
    grace_period: time::Duration,
    dry_run: bool,
) -> StorageResult<SweepReport> {
    let mut referenced: HashSet<PathBuf> = metadata
        .all_indexed_paths()
        .await?
        .into_iter()
        .map(PathBuf::from)
        .collect();
    referenced.extend(
        metadata
            .all_version_paths()
            .await?
            .into_iter()
            .map(PathBuf::from),
    );

    let mut report = SweepReport {
        dry_run,
        ..SweepReport::default()
    };
    let now = SystemTime::now();

    for dir in layout.managed_dirs() {
        let files = fs::walk_files(&dir)
            .await
            .map_err(|source| StorageError::FileUnreadable {
                path: dir.clone(),
                source,
            })?;
        for file in files {
            let is_temp = file
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(fs::is_temp_file);
            if is_temp {
                continue;
            }
            report.scanned += 1;

            match process(&file, &referenced, now, grace_period, dry_run).await {
                Disposition::Referenced => {}
                Disposition::Recent => {
                    report.orphans += 1;
                    report.kept_recent += 1;
                }
                Disposition::Deleted(bytes) => {
                    report.orphans += 1;
                    report.deleted += 1;
                    report.bytes_reclaimed += bytes;
                }
                Disposition::WouldDelete(bytes) => {
                    report.orphans += 1;
                    report.bytes_reclaimed += bytes;
                }
                Disposition::Error(e) => {
                    report.orphans += 1;
                    report.errors.push(e);
                }
            }
        }
    }

    tracing::info!(
        dry_run,
        scanned = report.scanned,
        orphans = report.orphans,
        deleted = report.deleted,
        kept_recent = report.kept_recent,
        bytes_reclaimed = report.bytes_reclaimed,
        errors = report.errors.len(),
        "Orphan sweep completed"
    );
    Ok(report)
}

async fn process(
    file: &WalkedFile,
    referenced: &HashSet<PathBuf>,
    now: SystemTime,
    grace_period: time::Duration,
    dry_run: bool,
) -> Disposition {
    if referenced.contains(&file.path) {
        return Disposition::Referenced;
    }

    // Without a modification time the age is unknown; keep the file.
    let Some(age) = file
        .modified
        .and_then(|m| now.duration_since(m).ok())
        .and_then(|age| time::Duration::try_from(age).ok())
    else {
        tracing::warn!(path = %file.path.display(), "Orphan has no usable modification time, keeping");
        return Disposition::Recent;
    };
    if age < grace_period {
        tracing::trace!(
            path = %file.path.display(),
            age_secs = age.whole_seconds(),
            "Orphan within grace period, keeping"
        );
        return Disposition::Recent;
    }

    if dry_run {
        tracing::info!(
            path = %file.path.display(),
            age_secs = age.whole_seconds(),
            size = file.size,
            "DRY-RUN: Would delete orphaned file"
        );
        return Disposition::WouldDelete(file.size);
    }

    match fs::remove_if_exists(&file.path).await {
        Ok(_) => {
            tracing::info!(
                path = %file.path.display(),
                age_secs = age.whole_seconds(),
                size = file.size,
                "Deleted orphaned file"
            );
            Disposition::Deleted(file.size)
        }
        Err(e) => Disposition::Error(format!("{}: {e}", file.path.display())),
    }
}
