use docvault_metadata::SqliteStore;
use docvault_metadata::models::StorageIndexEntry;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;

/// SQLite store in a temporary directory, removed on drop.
pub struct TestMetadata {
    store: SqliteStore,
    path: PathBuf,
    _dir: TempDir,
}

impl TestMetadata {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let store = SqliteStore::new(&path, 4, Duration::from_secs(5))
            .await
            .unwrap();
        Self {
            store,
            path,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

pub fn sample_entry(key: &str) -> StorageIndexEntry {
    StorageIndexEntry {
        storage_key: key.to_string(),
        original_name: "report.pdf".to_string(),
        content_type: "application/pdf".to_string(),
        size_bytes: 3,
        checksum: Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_string()),
        primary_path: format!("/vault/originals/{}/{key}_report.pdf", &key[..2]),
        backup_paths: vec![format!("/vault/backup/{}/{key}_report.pdf", &key[..2])],
        known_alternate_paths: vec![format!("/vault/backup/{}/{key}_report.pdf", &key[..2])],
        owner_id: None,
        unrecoverable: false,
        migrated_to: None,
        created_at: OffsetDateTime::now_utc(),
        last_verified_at: None,
        restored_at: None,
        restored_from: None,
    }
}
