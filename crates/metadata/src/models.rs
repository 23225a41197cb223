//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Storage index
// =============================================================================

/// Row of the `storage_index` table.
#[derive(Debug, Clone, FromRow)]
pub struct IndexEntryRow {
    pub storage_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// Hex SHA-256; absent for records inherited from older generations.
    pub checksum: Option<String>,
    pub primary_path: String,
    pub owner_id: Option<String>,
    pub unrecoverable: bool,
    /// Key of the current-generation copy once migrated.
    pub migrated_to: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_verified_at: Option<OffsetDateTime>,
    pub restored_at: Option<OffsetDateTime>,
    pub restored_from: Option<String>,
}

/// Row of the `index_paths` table.
#[derive(Debug, Clone, FromRow)]
pub struct IndexPathRow {
    pub seq: i64,
    pub storage_key: String,
    pub path: String,
    pub kind: String,
    pub recorded_at: OffsetDateTime,
}

/// Kind of path recorded against an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Written by the content store at store time.
    Backup,
    /// Discovered during recovery.
    Alternate,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Alternate => "alternate",
        }
    }
}

/// Full index entry: the stored file plus recovery bookkeeping.
#[derive(Debug, Clone)]
pub struct StorageIndexEntry {
    pub storage_key: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub primary_path: String,
    /// Backup copies in write order.
    pub backup_paths: Vec<String>,
    /// Every recorded location, backups first, then discovered alternates in
    /// discovery order.
    pub known_alternate_paths: Vec<String>,
    pub owner_id: Option<String>,
    pub unrecoverable: bool,
    pub migrated_to: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_verified_at: Option<OffsetDateTime>,
    pub restored_at: Option<OffsetDateTime>,
    pub restored_from: Option<String>,
}

impl StorageIndexEntry {
    /// Assemble an entry from its row and recorded paths (any order).
    pub fn from_parts(row: IndexEntryRow, mut paths: Vec<IndexPathRow>) -> Self {
        paths.sort_by_key(|p| (p.kind != PathKind::Backup.as_str(), p.seq));
        let backup_paths = paths
            .iter()
            .filter(|p| p.kind == PathKind::Backup.as_str())
            .map(|p| p.path.clone())
            .collect();
        let known_alternate_paths = paths.into_iter().map(|p| p.path).collect();
        Self {
            storage_key: row.storage_key,
            original_name: row.original_name,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            checksum: row.checksum,
            primary_path: row.primary_path,
            backup_paths,
            known_alternate_paths,
            owner_id: row.owner_id,
            unrecoverable: row.unrecoverable,
            migrated_to: row.migrated_to,
            created_at: row.created_at,
            last_verified_at: row.last_verified_at,
            restored_at: row.restored_at,
            restored_from: row.restored_from,
        }
    }

    /// Discovered alternates that are not backups.
    pub fn discovered_paths(&self) -> impl Iterator<Item = &String> {
        self.known_alternate_paths
            .iter()
            .filter(|p| !self.backup_paths.contains(p))
    }
}

/// Aggregate counts over the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexStats {
    pub entries: u64,
    pub total_bytes: u64,
    pub unrecoverable: u64,
    pub migrated: u64,
    pub alternate_paths: u64,
}

// =============================================================================
// Owning records
// =============================================================================

/// Reference held by an external document record.
#[derive(Debug, Clone, FromRow)]
pub struct OwningRecordRow {
    pub record_id: String,
    /// Current file, once the record has been moved into the keyed layout.
    pub storage_key: Option<String>,
    /// Bare file name from the pre-key era.
    pub legacy_filename: Option<String>,
    /// Path recorded by the pre-key era.
    pub legacy_path: Option<String>,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// File versions
// =============================================================================

/// A superseded revision kept under `versions/`.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct FileVersionRow {
    pub version_id: i64,
    /// Head of the lineage this revision belongs to.
    pub storage_key: String,
    /// Key the revision was stored under before it was superseded.
    pub previous_key: String,
    pub path: String,
    pub original_name: String,
    pub checksum: Option<String>,
    pub size_bytes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub archived_at: OffsetDateTime,
}

/// Fields for a new file version row.
#[derive(Debug, Clone)]
pub struct NewFileVersion {
    pub storage_key: String,
    pub previous_key: String,
    pub path: String,
    pub original_name: String,
    pub checksum: Option<String>,
    pub size_bytes: i64,
    pub archived_at: OffsetDateTime,
}

// =============================================================================
// Audit log
// =============================================================================

/// Row of the append-only `audit_records` table.
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct AuditRecordRow {
    pub id: i64,
    pub actor_id: String,
    pub operation: String,
    pub subject_key: String,
    pub result: String,
    pub detail: Option<String>,
    /// Fixed-width RFC 3339 text, hashed verbatim.
    pub timestamp: String,
    pub prev_hash: Option<String>,
    pub integrity_hash: String,
}

impl AuditRecordRow {
    /// Recompute this record's integrity hash from its stored fields.
    pub fn recompute_hash(&self) -> String {
        docvault_core::ChainFields {
            id: self.id,
            prev_hash: self.prev_hash.as_deref(),
            actor_id: &self.actor_id,
            operation: &self.operation,
            subject_key: &self.subject_key,
            result: &self.result,
            timestamp: &self.timestamp,
            detail: self.detail.as_deref(),
        }
        .integrity_hash()
        .to_hex()
    }
}

/// Fields supplied by the caller of an audit append.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub actor_id: String,
    pub operation: String,
    pub subject_key: String,
    pub result: String,
    pub detail: Option<String>,
    pub timestamp: OffsetDateTime,
}

/// Filter for listing audit records. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Inclusive lower bound.
    pub start: Option<OffsetDateTime>,
    /// Inclusive upper bound.
    pub end: Option<OffsetDateTime>,
    pub actor_id: Option<String>,
    pub operation: Option<String>,
    pub result: Option<String>,
    pub subject_key: Option<String>,
    /// Only records with a greater id (paging cursor).
    pub after_id: Option<i64>,
    pub limit: Option<u32>,
}
