//! Redundant content store.
//!
//! Every stored file gets a primary copy under `originals/` and one copy per
//! configured backup root. The primary is written first; backups are written
//! concurrently, each bounded by a timeout. The index entry is registered only
//! after at least one copy is durable.

use crate::error::{StorageError, StorageResult};
use crate::fs;
use crate::layout::StorageLayout;
use docvault_core::content_type::content_type_for;
use docvault_core::hash::ContentHash;
use docvault_core::storage_key::StorageKey;
use docvault_core::stored_file::StoredFile;
use docvault_metadata::MetadataStore;
use docvault_metadata::models::{
    FileVersionRow, IndexStats, NewFileVersion, OwningRecordRow, StorageIndexEntry,
};
use docvault_metadata::repos::{IndexRepo, RecordRepo, VersionRepo};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Writes, replaces and removes file content.
pub struct ContentStore {
    layout: StorageLayout,
    metadata: Arc<dyn MetadataStore>,
    backup_write_timeout: Duration,
    key_attempts: u32,
}

/// Result of deleting a stored file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub storage_key: String,
    pub files_removed: u64,
    pub versions_removed: u64,
    pub records_cleared: u64,
    /// Copies that could not be removed. The index entry is gone regardless.
    pub errors: Vec<String>,
}

/// File and byte counts for one area of the storage tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AreaStats {
    pub files: u64,
    pub bytes: u64,
}

/// Storage usage summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub originals: AreaStats,
    pub backups: AreaStats,
    pub versions: AreaStats,
    pub index: IndexStats,
}

impl ContentStore {
    pub fn new(
        layout: StorageLayout,
        metadata: Arc<dyn MetadataStore>,
        backup_write_timeout: Duration,
        key_attempts: u32,
    ) -> Self {
        Self {
            layout,
            metadata,
            backup_write_timeout,
            key_attempts,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Store new content and register it in the index.
    ///
    /// When `owner` names a record, that record is pointed at the new key.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn store(
        &self,
        data: &[u8],
        original_name: &str,
        owner: Option<&str>,
    ) -> StorageResult<StoredFile> {
        let stored = self.write_new(data, original_name).await?;
        if let Some(record_id) = owner {
            self.assign_owner(record_id, &stored.storage_key).await?;
        }
        tracing::info!(
            storage_key = %stored.storage_key,
            original_name = %stored.original_name,
            size = stored.size_bytes,
            "Stored file"
        );
        Ok(stored)
    }

    /// Replace the content of `key`, archiving the bytes at `current_path` first.
    ///
    /// The replacement gets a fresh key; version history and the owning record
    /// follow it. Old copies are removed once the new entry is registered.
    #[tracing::instrument(skip(self, data), fields(storage_key = %key, size = data.len()))]
    pub async fn update(
        &self,
        key: &StorageKey,
        data: &[u8],
        current_path: &Path,
    ) -> StorageResult<StoredFile> {
        let entry = self.metadata.require_entry(key.as_str()).await?;

        let current = tokio::fs::read(current_path).await.map_err(|e| {
            StorageError::WriteFailure(format!(
                "failed to snapshot {}: {e}",
                current_path.display()
            ))
        })?;
        let archived_at = OffsetDateTime::now_utc();
        let version_path = self
            .layout
            .version_path(key, &entry.original_name, archived_at);
        fs::write_atomic(&version_path, &current)
            .await
            .map_err(|e| {
                StorageError::WriteFailure(format!(
                    "failed to write version {}: {e}",
                    version_path.display()
                ))
            })?;

        let version = NewFileVersion {
            storage_key: key.to_string(),
            previous_key: key.to_string(),
            path: version_path.to_string_lossy().into_owned(),
            original_name: entry.original_name.clone(),
            checksum: Some(ContentHash::compute(&current).to_hex()),
            size_bytes: current.len() as i64,
            archived_at,
        };
        if let Err(e) = self.metadata.insert_version(&version).await {
            fs::remove_best_effort(&version_path).await;
            return Err(e.into());
        }

        let stored = self.write_new(data, &entry.original_name).await?;
        let new_key = stored.storage_key.as_str();

        self.metadata.reassign_versions(key.as_str(), new_key).await?;
        if let Some(owner) = entry.owner_id.as_deref() {
            self.metadata
                .update_record_reference(owner, new_key)
                .await?;
        }

        // Copies outside the managed tree belong to an older layout and stay put.
        for path in std::iter::once(&entry.primary_path).chain(entry.backup_paths.iter()) {
            let path = Path::new(path);
            if self.layout.is_managed(path) {
                fs::remove_best_effort(path).await;
            }
        }
        self.metadata.delete_entry(key.as_str()).await?;

        tracing::info!(
            previous_key = %key,
            storage_key = %stored.storage_key,
            version = %version_path.display(),
            "Updated file"
        );
        Ok(stored)
    }

    /// Delete a stored file, its copies and its version history.
    ///
    /// The index entry is removed first; copy removal is best effort.
    #[tracing::instrument(skip(self), fields(storage_key = %key))]
    pub async fn delete(&self, key: &StorageKey) -> StorageResult<DeleteReport> {
        let entry = self.metadata.require_entry(key.as_str()).await?;

        self.metadata.delete_entry(key.as_str()).await?;
        let records_cleared = self.metadata.clear_record_reference(key.as_str()).await?;
        let versions = self.metadata.delete_versions(key.as_str()).await?;

        let mut report = DeleteReport {
            storage_key: key.to_string(),
            versions_removed: versions.len() as u64,
            records_cleared,
            ..DeleteReport::default()
        };

        let paths = std::iter::once(entry.primary_path.as_str())
            .chain(entry.backup_paths.iter().map(String::as_str))
            .chain(versions.iter().map(|v| v.path.as_str()));
        for path in paths {
            match fs::remove_if_exists(Path::new(path)).await {
                Ok(true) => report.files_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to remove copy");
                    report.errors.push(format!("{path}: {e}"));
                }
            }
        }

        tracing::info!(
            storage_key = %key,
            files_removed = report.files_removed,
            versions_removed = report.versions_removed,
            errors = report.errors.len(),
            "Deleted file"
        );
        Ok(report)
    }

    /// Index view of a stored file.
    pub async fn describe(&self, key: &StorageKey) -> StorageResult<StoredFile> {
        let entry = self.metadata.require_entry(key.as_str()).await?;
        stored_file_from_entry(&entry)
    }

    /// Retained revisions of a key, oldest first.
    pub async fn versions(&self, key: &StorageKey) -> StorageResult<Vec<FileVersionRow>> {
        self.metadata.require_entry(key.as_str()).await?;
        Ok(self.metadata.list_versions(key.as_str()).await?)
    }

    /// Point a record at `key`, creating the record if it does not exist.
    pub async fn assign_owner(&self, record_id: &str, key: &StorageKey) -> StorageResult<()> {
        if self.metadata.get_record(record_id).await?.is_some() {
            self.metadata
                .update_record_reference(record_id, key.as_str())
                .await?;
        } else {
            self.metadata
                .upsert_record(&OwningRecordRow {
                    record_id: record_id.to_string(),
                    storage_key: Some(key.to_string()),
                    legacy_filename: None,
                    legacy_path: None,
                    updated_at: OffsetDateTime::now_utc(),
                })
                .await?;
            self.metadata
                .set_owner(key.as_str(), Some(record_id))
                .await?;
        }
        Ok(())
    }

    /// File and byte counts per area, plus index totals.
    pub async fn stats(&self) -> StorageResult<StorageStats> {
        let mut backups = AreaStats::default();
        for root in self.layout.backup_roots() {
            let area = area_stats(root).await?;
            backups.files += area.files;
            backups.bytes += area.bytes;
        }
        Ok(StorageStats {
            originals: area_stats(self.layout.originals_dir()).await?,
            backups,
            versions: area_stats(self.layout.versions_dir()).await?,
            index: self.metadata.index_stats().await?,
        })
    }

    async fn write_new(&self, data: &[u8], original_name: &str) -> StorageResult<StoredFile> {
        let checksum = ContentHash::compute(data);
        let key = self.generate_key(&checksum, original_name).await?;

        let primary = self.layout.primary_path(&key, original_name);
        let primary_ok = match fs::write_atomic(&primary, data).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    storage_key = %key,
                    path = %primary.display(),
                    error = %e,
                    "Primary write failed"
                );
                false
            }
        };

        let backups = self.write_backups(&key, original_name, data).await;

        if !primary_ok && backups.is_empty() {
            return Err(StorageError::StorageUnavailable(format!(
                "no copy of {key} could be written"
            )));
        }
        if !primary_ok {
            tracing::warn!(
                storage_key = %key,
                backups = backups.len(),
                "Stored without primary copy; next resolve will repair it"
            );
        }

        let created_at = OffsetDateTime::now_utc();
        let entry = StorageIndexEntry {
            storage_key: key.to_string(),
            original_name: original_name.to_string(),
            content_type: content_type_for(original_name).to_string(),
            size_bytes: data.len() as i64,
            checksum: Some(checksum.to_hex()),
            primary_path: primary.to_string_lossy().into_owned(),
            backup_paths: backups
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            known_alternate_paths: Vec::new(),
            owner_id: None,
            unrecoverable: false,
            migrated_to: None,
            created_at,
            last_verified_at: None,
            restored_at: None,
            restored_from: None,
        };

        if let Err(e) = self.metadata.put_entry(&entry).await {
            fs::remove_best_effort(&primary).await;
            for path in &backups {
                fs::remove_best_effort(path).await;
            }
            return Err(e.into());
        }

        Ok(StoredFile {
            storage_key: key,
            original_name: entry.original_name,
            content_type: entry.content_type,
            size_bytes: data.len() as u64,
            checksum: Some(checksum),
            primary_path: primary,
            backup_paths: backups,
            created_at,
            last_verified_at: None,
        })
    }

    async fn generate_key(
        &self,
        checksum: &ContentHash,
        original_name: &str,
    ) -> StorageResult<StorageKey> {
        for attempt in 1..=self.key_attempts {
            let key = StorageKey::generate(checksum);
            let taken = self.metadata.entry_exists(key.as_str()).await?
                || matches!(
                    tokio::fs::try_exists(self.layout.primary_path(&key, original_name)).await,
                    Ok(true)
                );
            if !taken {
                return Ok(key);
            }
            tracing::debug!(storage_key = %key, attempt, "Storage key collision");
        }
        Err(StorageError::WriteFailure(format!(
            "no free storage key after {} attempts",
            self.key_attempts
        )))
    }

    /// Write every backup concurrently. Returns the paths that succeeded, in order.
    async fn write_backups(&self, key: &StorageKey, original_name: &str, data: &[u8]) -> Vec<PathBuf> {
        let timeout = self.backup_write_timeout;
        let writes = self
            .layout
            .backup_paths(key, original_name)
            .into_iter()
            .map(|path| async move {
                let result = match tokio::time::timeout(timeout, fs::write_atomic(&path, data)).await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {timeout:?}")),
                };
                (path, result)
            });

        let mut written = Vec::new();
        for (path, result) in futures::future::join_all(writes).await {
            match result {
                Ok(()) => written.push(path),
                Err(error) => tracing::warn!(
                    storage_key = %key,
                    path = %path.display(),
                    error = %error,
                    "Backup write failed"
                ),
            }
        }
        written
    }
}

/// Convert an index entry into the public stored file view.
fn stored_file_from_entry(entry: &StorageIndexEntry) -> StorageResult<StoredFile> {
    Ok(StoredFile {
        storage_key: StorageKey::parse(&entry.storage_key)?,
        original_name: entry.original_name.clone(),
        content_type: entry.content_type.clone(),
        size_bytes: u64::try_from(entry.size_bytes).map_err(|_| {
            StorageError::InvalidRecord(format!(
                "negative size for {}: {}",
                entry.storage_key, entry.size_bytes
            ))
        })?,
        checksum: entry
            .checksum
            .as_deref()
            .map(ContentHash::from_hex)
            .transpose()?,
        primary_path: PathBuf::from(&entry.primary_path),
        backup_paths: entry.backup_paths.iter().map(PathBuf::from).collect(),
        created_at: entry.created_at,
        last_verified_at: entry.last_verified_at,
    })
}

async fn area_stats(dir: &Path) -> StorageResult<AreaStats> {
    let files = fs::walk_files(dir)
        .await
        .map_err(|source| StorageError::FileUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;
    Ok(files
        .iter()
        .filter(|f| {
            !f.path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(fs::is_temp_file)
        })
        .fold(AreaStats::default(), |acc, f| AreaStats {
            files: acc.files + 1,
            bytes: acc.bytes + f.size,
        }))
}
