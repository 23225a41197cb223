//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AuditRepo, IndexRepo, RecordRepo, VersionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: IndexRepo + RecordRepo + VersionRepo + AuditRepo + Send + Sync {
    /// Create tables and indexes.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Check the database file for structural damage.
    async fn integrity_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the index database.
    ///
    /// A damaged database file fails with [`MetadataError::IndexCorrupt`]; it is
    /// never replaced with an empty one.
    pub async fn new(
        path: impl AsRef<Path>,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(MetadataError::from_sqlx)?;

        let store = Self { pool };
        store.integrity_check().await?;
        store.migrate().await?;

        tracing::info!(path = %path.display(), "Opened storage index");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool, waiting for connections to be released.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(MetadataError::from_sqlx)?;
        Ok(())
    }

    async fn integrity_check(&self) -> MetadataResult<()> {
        let rows: Vec<(String,)> = sqlx::query_as("PRAGMA quick_check")
            .fetch_all(&self.pool)
            .await
            .map_err(MetadataError::from_sqlx)?;
        let problems: Vec<String> = rows
            .into_iter()
            .map(|r| r.0)
            .filter(|line| line != "ok")
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            tracing::error!(problems = problems.len(), "Storage index failed quick_check");
            Err(MetadataError::IndexCorrupt(problems.join("; ")))
        }
    }
}

fn unique_violation(err: sqlx::Error, what: impl FnOnce() -> String) -> MetadataError {
    match err {
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint") => {
            MetadataError::Constraint(what())
        }
        other => MetadataError::from_sqlx(other),
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use docvault_core::format_timestamp;
    use std::collections::HashMap;
    use time::OffsetDateTime;

    /// For transactions that read before they write.
    const BEGIN_IMMEDIATE: &str = "BEGIN IMMEDIATE";

    const MIGRATION_CURSOR: &str = "migration_cursor";

    // =========================================================================
    // Storage index
    // =========================================================================

    #[async_trait]
    impl IndexRepo for SqliteStore {
        async fn put_entry(&self, entry: &StorageIndexEntry) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO storage_index (
                    storage_key, original_name, content_type, size_bytes, checksum,
                    primary_path, owner_id, unrecoverable, migrated_to, created_at,
                    last_verified_at, restored_at, restored_from
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(storage_key) DO UPDATE SET
                    original_name = excluded.original_name,
                    content_type = excluded.content_type,
                    size_bytes = excluded.size_bytes,
                    checksum = excluded.checksum,
                    primary_path = excluded.primary_path,
                    owner_id = excluded.owner_id,
                    unrecoverable = excluded.unrecoverable,
                    migrated_to = excluded.migrated_to,
                    last_verified_at = excluded.last_verified_at,
                    restored_at = excluded.restored_at,
                    restored_from = excluded.restored_from
                "#,
            )
            .bind(&entry.storage_key)
            .bind(&entry.original_name)
            .bind(&entry.content_type)
            .bind(entry.size_bytes)
            .bind(&entry.checksum)
            .bind(&entry.primary_path)
            .bind(&entry.owner_id)
            .bind(entry.unrecoverable)
            .bind(&entry.migrated_to)
            .bind(entry.created_at)
            .bind(entry.last_verified_at)
            .bind(entry.restored_at)
            .bind(&entry.restored_from)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM index_paths WHERE storage_key = ? AND kind = 'backup'")
                .bind(&entry.storage_key)
                .execute(&mut *tx)
                .await?;

            for path in &entry.backup_paths {
                // A path first discovered as an alternate becomes a backup.
                sqlx::query(
                    r#"
                    INSERT INTO index_paths (storage_key, path, kind, recorded_at)
                    VALUES (?, ?, 'backup', ?)
                    ON CONFLICT(storage_key, path) DO UPDATE SET kind = 'backup'
                    "#,
                )
                .bind(&entry.storage_key)
                .bind(path)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            for path in entry.discovered_paths() {
                sqlx::query(
                    "INSERT OR IGNORE INTO index_paths (storage_key, path, kind, recorded_at) VALUES (?, ?, 'alternate', ?)",
                )
                .bind(&entry.storage_key)
                .bind(path)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn get_entry(&self, storage_key: &str) -> MetadataResult<Option<StorageIndexEntry>> {
            let Some(row) = sqlx::query_as::<_, IndexEntryRow>(
                "SELECT * FROM storage_index WHERE storage_key = ?",
            )
            .bind(storage_key)
            .fetch_optional(&self.pool)
            .await?
            else {
                return Ok(None);
            };

            let paths = sqlx::query_as::<_, IndexPathRow>(
                "SELECT * FROM index_paths WHERE storage_key = ? ORDER BY seq",
            )
            .bind(storage_key)
            .fetch_all(&self.pool)
            .await?;

            Ok(Some(StorageIndexEntry::from_parts(row, paths)))
        }

        async fn entry_exists(&self, storage_key: &str) -> MetadataResult<bool> {
            let row: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM storage_index WHERE storage_key = ?")
                    .bind(storage_key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.is_some())
        }

        async fn get_entry_by_owner(
            &self,
            owner_id: &str,
        ) -> MetadataResult<Option<StorageIndexEntry>> {
            let key: Option<(String,)> = sqlx::query_as(
                "SELECT storage_key FROM storage_index WHERE owner_id = ? AND migrated_to IS NULL ORDER BY created_at DESC LIMIT 1",
            )
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
            match key {
                Some((key,)) => self.get_entry(&key).await,
                None => Ok(None),
            }
        }

        async fn record_alternate_path(
            &self,
            storage_key: &str,
            path: &str,
        ) -> MetadataResult<bool> {
            if !self.entry_exists(storage_key).await? {
                return Err(MetadataError::NotFound(format!("storage key {storage_key}")));
            }
            let result = sqlx::query(
                "INSERT OR IGNORE INTO index_paths (storage_key, path, kind, recorded_at) VALUES (?, ?, 'alternate', ?)",
            )
            .bind(storage_key)
            .bind(path)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn all_entries(&self, limit: Option<u32>) -> MetadataResult<Vec<StorageIndexEntry>> {
            // One read transaction so rows and paths come from the same snapshot.
            let mut tx = self.pool.begin().await?;

            let rows = sqlx::query_as::<_, IndexEntryRow>(
                "SELECT * FROM storage_index ORDER BY created_at, storage_key LIMIT ?",
            )
            .bind(limit.map_or(-1, i64::from))
            .fetch_all(&mut *tx)
            .await?;

            let paths = sqlx::query_as::<_, IndexPathRow>("SELECT * FROM index_paths ORDER BY seq")
                .fetch_all(&mut *tx)
                .await?;

            tx.commit().await?;

            let mut by_key: HashMap<String, Vec<IndexPathRow>> = HashMap::new();
            for path in paths {
                by_key.entry(path.storage_key.clone()).or_default().push(path);
            }

            Ok(rows
                .into_iter()
                .map(|row| {
                    let paths = by_key.remove(&row.storage_key).unwrap_or_default();
                    StorageIndexEntry::from_parts(row, paths)
                })
                .collect())
        }

        async fn delete_entry(&self, storage_key: &str) -> MetadataResult<bool> {
            let result = sqlx::query("DELETE FROM storage_index WHERE storage_key = ?")
                .bind(storage_key)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn set_primary_path(
            &self,
            storage_key: &str,
            primary_path: &str,
            restored_from: &str,
            restored_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE storage_index
                SET primary_path = ?, restored_from = ?, restored_at = ?, unrecoverable = 0
                WHERE storage_key = ?
                "#,
            )
            .bind(primary_path)
            .bind(restored_from)
            .bind(restored_at)
            .bind(storage_key)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("storage key {storage_key}")));
            }
            Ok(())
        }

        async fn mark_verified(&self, storage_key: &str, at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE storage_index SET last_verified_at = ?, unrecoverable = 0 WHERE storage_key = ?",
            )
            .bind(at)
            .bind(storage_key)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn set_unrecoverable(
            &self,
            storage_key: &str,
            unrecoverable: bool,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE storage_index SET unrecoverable = ? WHERE storage_key = ?")
                .bind(unrecoverable)
                .bind(storage_key)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn mark_migrated(&self, storage_key: &str, migrated_to: &str) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE storage_index SET migrated_to = ? WHERE storage_key = ?")
                    .bind(migrated_to)
                    .bind(storage_key)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("storage key {storage_key}")));
            }
            Ok(())
        }

        async fn set_owner(&self, storage_key: &str, owner_id: Option<&str>) -> MetadataResult<()> {
            sqlx::query("UPDATE storage_index SET owner_id = ? WHERE storage_key = ?")
                .bind(owner_id)
                .bind(storage_key)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn all_indexed_paths(&self) -> MetadataResult<Vec<String>> {
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT primary_path FROM storage_index UNION SELECT path FROM index_paths",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|r| r.0).collect())
        }

        async fn index_stats(&self) -> MetadataResult<IndexStats> {
            let (entries, total_bytes, unrecoverable, migrated): (i64, i64, i64, i64) =
                sqlx::query_as(
                    r#"
                    SELECT COUNT(*), COALESCE(SUM(size_bytes), 0),
                           COALESCE(SUM(unrecoverable), 0), COUNT(migrated_to)
                    FROM storage_index
                    "#,
                )
                .fetch_one(&self.pool)
                .await?;
            let (alternate_paths,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM index_paths WHERE kind = 'alternate'")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(IndexStats {
                entries: entries.max(0) as u64,
                total_bytes: total_bytes.max(0) as u64,
                unrecoverable: unrecoverable.max(0) as u64,
                migrated: migrated.max(0) as u64,
                alternate_paths: alternate_paths.max(0) as u64,
            })
        }
    }

    // =========================================================================
    // Owning records
    // =========================================================================

    #[async_trait]
    impl RecordRepo for SqliteStore {
        async fn upsert_record(&self, record: &OwningRecordRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO owning_records (record_id, storage_key, legacy_filename, legacy_path, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(record_id) DO UPDATE SET
                    storage_key = excluded.storage_key,
                    legacy_filename = excluded.legacy_filename,
                    legacy_path = excluded.legacy_path,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.record_id)
            .bind(&record.storage_key)
            .bind(&record.legacy_filename)
            .bind(&record.legacy_path)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                unique_violation(e, || {
                    format!(
                        "storage key {:?} is already referenced by another record",
                        record.storage_key
                    )
                })
            })?;
            Ok(())
        }

        async fn get_record(&self, record_id: &str) -> MetadataResult<Option<OwningRecordRow>> {
            let row = sqlx::query_as::<_, OwningRecordRow>(
                "SELECT * FROM owning_records WHERE record_id = ?",
            )
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_record_by_key(
            &self,
            storage_key: &str,
        ) -> MetadataResult<Option<OwningRecordRow>> {
            let row = sqlx::query_as::<_, OwningRecordRow>(
                "SELECT * FROM owning_records WHERE storage_key = ?",
            )
            .bind(storage_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_records(
            &self,
            after: Option<&str>,
            limit: u32,
        ) -> MetadataResult<Vec<OwningRecordRow>> {
            let rows = sqlx::query_as::<_, OwningRecordRow>(
                "SELECT * FROM owning_records WHERE (? IS NULL OR record_id > ?) ORDER BY record_id LIMIT ?",
            )
            .bind(after)
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn update_record_reference(
            &self,
            record_id: &str,
            storage_key: &str,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

            let previous: Option<(Option<String>,)> =
                sqlx::query_as("SELECT storage_key FROM owning_records WHERE record_id = ?")
                    .bind(record_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some((previous,)) = previous else {
                return Err(MetadataError::NotFound(format!("record {record_id}")));
            };

            sqlx::query("UPDATE owning_records SET storage_key = ?, updated_at = ? WHERE record_id = ?")
                .bind(storage_key)
                .bind(OffsetDateTime::now_utc())
                .bind(record_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    unique_violation(e, || {
                        format!("storage key {storage_key} is already referenced by another record")
                    })
                })?;

            if let Some(previous) = previous.as_deref()
                && previous != storage_key
            {
                sqlx::query(
                    "UPDATE storage_index SET owner_id = NULL WHERE storage_key = ? AND owner_id = ?",
                )
                .bind(previous)
                .bind(record_id)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("UPDATE storage_index SET owner_id = ? WHERE storage_key = ?")
                .bind(record_id)
                .bind(storage_key)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn clear_record_reference(&self, storage_key: &str) -> MetadataResult<u64> {
            // The file is gone for good; legacy hints must not bring it back.
            let result = sqlx::query(
                r#"
                UPDATE owning_records
                SET storage_key = NULL, legacy_filename = NULL, legacy_path = NULL, updated_at = ?
                WHERE storage_key = ?
                "#,
            )
            .bind(OffsetDateTime::now_utc())
            .bind(storage_key)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn migration_cursor(&self) -> MetadataResult<Option<String>> {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM maintenance_state WHERE name = ?")
                    .bind(MIGRATION_CURSOR)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(|r| r.0))
        }

        async fn set_migration_cursor(&self, cursor: Option<&str>) -> MetadataResult<()> {
            match cursor {
                Some(value) => {
                    sqlx::query(
                        r#"
                        INSERT INTO maintenance_state (name, value, updated_at) VALUES (?, ?, ?)
                        ON CONFLICT(name) DO UPDATE SET
                            value = excluded.value,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(MIGRATION_CURSOR)
                    .bind(value)
                    .bind(OffsetDateTime::now_utc())
                    .execute(&self.pool)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM maintenance_state WHERE name = ?")
                        .bind(MIGRATION_CURSOR)
                        .execute(&self.pool)
                        .await?;
                }
            }
            Ok(())
        }
    }

    // =========================================================================
    // File versions
    // =========================================================================

    #[async_trait]
    impl VersionRepo for SqliteStore {
        async fn insert_version(&self, version: &NewFileVersion) -> MetadataResult<i64> {
            let result = sqlx::query(
                r#"
                INSERT INTO file_versions (
                    storage_key, previous_key, path, original_name, checksum, size_bytes, archived_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&version.storage_key)
            .bind(&version.previous_key)
            .bind(&version.path)
            .bind(&version.original_name)
            .bind(&version.checksum)
            .bind(version.size_bytes)
            .bind(version.archived_at)
            .execute(&self.pool)
            .await?;
            Ok(result.last_insert_rowid())
        }

        async fn list_versions(&self, storage_key: &str) -> MetadataResult<Vec<FileVersionRow>> {
            let rows = sqlx::query_as::<_, FileVersionRow>(
                "SELECT * FROM file_versions WHERE storage_key = ? ORDER BY version_id",
            )
            .bind(storage_key)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn reassign_versions(&self, from_key: &str, to_key: &str) -> MetadataResult<u64> {
            let result = sqlx::query("UPDATE file_versions SET storage_key = ? WHERE storage_key = ?")
                .bind(to_key)
                .bind(from_key)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn delete_versions(&self, storage_key: &str) -> MetadataResult<Vec<FileVersionRow>> {
            let rows = sqlx::query_as::<_, FileVersionRow>(
                "DELETE FROM file_versions WHERE storage_key = ? RETURNING *",
            )
            .bind(storage_key)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn all_version_paths(&self) -> MetadataResult<Vec<String>> {
            let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM file_versions")
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(|r| r.0).collect())
        }
    }

    // =========================================================================
    // Audit log
    // =========================================================================

    #[async_trait]
    impl AuditRepo for SqliteStore {
        async fn append_audit_record(&self, draft: &AuditDraft) -> MetadataResult<AuditRecordRow> {
            let timestamp = format_timestamp(draft.timestamp)
                .map_err(|e| MetadataError::Internal(e.to_string()))?;

            // Take the write lock before reading the tail so concurrent
            // appenders wait on busy_timeout instead of failing the upgrade.
            let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;

            let tail: Option<(i64, String)> = sqlx::query_as(
                "SELECT id, integrity_hash FROM audit_records ORDER BY id DESC LIMIT 1",
            )
            .fetch_optional(&mut *tx)
            .await?;

            let (id, prev_hash) = match tail {
                Some((id, hash)) => (id + 1, Some(hash)),
                None => (1, None),
            };

            let mut record = AuditRecordRow {
                id,
                actor_id: draft.actor_id.clone(),
                operation: draft.operation.clone(),
                subject_key: draft.subject_key.clone(),
                result: draft.result.clone(),
                detail: draft.detail.clone(),
                timestamp,
                prev_hash,
                integrity_hash: String::new(),
            };
            record.integrity_hash = record.recompute_hash();

            sqlx::query(
                r#"
                INSERT INTO audit_records (
                    id, actor_id, operation, subject_key, result, detail, timestamp,
                    prev_hash, integrity_hash
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.id)
            .bind(&record.actor_id)
            .bind(&record.operation)
            .bind(&record.subject_key)
            .bind(&record.result)
            .bind(&record.detail)
            .bind(&record.timestamp)
            .bind(&record.prev_hash)
            .bind(&record.integrity_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                unique_violation(e, || {
                    format!("audit record {id} was appended concurrently")
                })
            })?;

            tx.commit().await?;
            Ok(record)
        }

        async fn list_audit_records(
            &self,
            filter: &AuditFilter,
        ) -> MetadataResult<Vec<AuditRecordRow>> {
            let start = filter
                .start
                .map(format_timestamp)
                .transpose()
                .map_err(|e| MetadataError::Internal(e.to_string()))?;
            let end = filter
                .end
                .map(format_timestamp)
                .transpose()
                .map_err(|e| MetadataError::Internal(e.to_string()))?;

            let mut qb = sqlx::QueryBuilder::<Sqlite>::new("SELECT * FROM audit_records WHERE 1 = 1");
            if let Some(start) = start {
                qb.push(" AND timestamp >= ").push_bind(start);
            }
            if let Some(end) = end {
                qb.push(" AND timestamp <= ").push_bind(end);
            }
            if let Some(actor) = &filter.actor_id {
                qb.push(" AND actor_id = ").push_bind(actor.clone());
            }
            if let Some(operation) = &filter.operation {
                qb.push(" AND operation = ").push_bind(operation.clone());
            }
            if let Some(result) = &filter.result {
                qb.push(" AND result = ").push_bind(result.clone());
            }
            if let Some(subject) = &filter.subject_key {
                qb.push(" AND subject_key = ").push_bind(subject.clone());
            }
            if let Some(after) = filter.after_id {
                qb.push(" AND id > ").push_bind(after);
            }
            qb.push(" ORDER BY id");
            if let Some(limit) = filter.limit {
                qb.push(" LIMIT ").push_bind(i64::from(limit));
            }

            let rows = qb
                .build_query_as::<AuditRecordRow>()
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn get_audit_record(&self, id: i64) -> MetadataResult<Option<AuditRecordRow>> {
            let row = sqlx::query_as::<_, AuditRecordRow>("SELECT * FROM audit_records WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_audit_record_before(
            &self,
            id: i64,
        ) -> MetadataResult<Option<AuditRecordRow>> {
            let row = sqlx::query_as::<_, AuditRecordRow>(
                "SELECT * FROM audit_records WHERE id < ? ORDER BY id DESC LIMIT 1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn count_audit_records(&self) -> MetadataResult<u64> {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_records")
                .fetch_one(&self.pool)
                .await?;
            Ok(count.max(0) as u64)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Storage index: one row per stored file
CREATE TABLE IF NOT EXISTS storage_index (
    storage_key TEXT PRIMARY KEY,
    original_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    checksum TEXT,
    primary_path TEXT NOT NULL,
    owner_id TEXT,
    unrecoverable INTEGER NOT NULL DEFAULT 0,
    migrated_to TEXT,
    created_at TEXT NOT NULL,
    last_verified_at TEXT,
    restored_at TEXT,
    restored_from TEXT
);
CREATE INDEX IF NOT EXISTS idx_storage_index_owner ON storage_index(owner_id);
CREATE INDEX IF NOT EXISTS idx_storage_index_created ON storage_index(created_at, storage_key);

-- Backup and discovered locations per entry
CREATE TABLE IF NOT EXISTS index_paths (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_key TEXT NOT NULL REFERENCES storage_index(storage_key) ON DELETE CASCADE,
    path TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('backup', 'alternate')),
    recorded_at TEXT NOT NULL,
    UNIQUE (storage_key, path)
);
CREATE INDEX IF NOT EXISTS idx_index_paths_key ON index_paths(storage_key, seq);

-- References from external document records
CREATE TABLE IF NOT EXISTS owning_records (
    record_id TEXT PRIMARY KEY,
    storage_key TEXT,
    legacy_filename TEXT,
    legacy_path TEXT,
    updated_at TEXT NOT NULL
);
-- A stored file is referenced by at most one record
CREATE UNIQUE INDEX IF NOT EXISTS idx_owning_records_key
    ON owning_records(storage_key) WHERE storage_key IS NOT NULL;

-- Superseded revisions under versions/
CREATE TABLE IF NOT EXISTS file_versions (
    version_id INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_key TEXT NOT NULL,
    previous_key TEXT NOT NULL,
    path TEXT NOT NULL,
    original_name TEXT NOT NULL,
    checksum TEXT,
    size_bytes INTEGER NOT NULL,
    archived_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_versions_key ON file_versions(storage_key, version_id);

-- Progress of resumable maintenance jobs
CREATE TABLE IF NOT EXISTS maintenance_state (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Append-only audit log, hash-chained by id
CREATE TABLE IF NOT EXISTS audit_records (
    id INTEGER PRIMARY KEY,
    actor_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    subject_key TEXT NOT NULL,
    result TEXT NOT NULL,
    detail TEXT,
    timestamp TEXT NOT NULL,
    prev_hash TEXT,
    integrity_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_records_subject ON audit_records(subject_key, id);
CREATE INDEX IF NOT EXISTS idx_audit_records_timestamp ON audit_records(timestamp);
"#;
