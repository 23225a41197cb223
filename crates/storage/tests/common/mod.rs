pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{block_dir, seeded_bytes, sha256_hash, unblock_dir};

use docvault_core::config::AppConfig;
use docvault_metadata::models::OwningRecordRow;
use docvault_metadata::repos::RecordRepo;
use docvault_storage::Vault;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use time::OffsetDateTime;

pub const ACTOR: &str = "tester";

/// A vault rooted in a temporary directory.
pub struct TestVault {
    pub vault: Vault,
    pub config: AppConfig,
    dir: TempDir,
}

#[allow(dead_code)]
impl TestVault {
    pub async fn new() -> Self {
        Self::with_config(|_, _| {}).await
    }

    /// Build a vault after letting the caller adjust the test configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig, &Path)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::for_testing(dir.path());
        adjust(&mut config, dir.path());
        let vault = Vault::open(config.clone()).await.unwrap();
        Self { vault, config, dir }
    }

    /// Drop the vault and open it again over the same directories.
    pub async fn reopen(self) -> Self {
        let Self { vault, config, dir } = self;
        drop(vault);
        let vault = Vault::open(config.clone()).await.unwrap();
        Self { vault, config, dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn db_path(&self) -> &Path {
        &self.config.metadata.path
    }

    /// Register a record that predates storage keys.
    pub async fn legacy_record(&self, record_id: &str, filename: Option<&str>, path: Option<&Path>) {
        self.vault
            .metadata()
            .upsert_record(&OwningRecordRow {
                record_id: record_id.to_string(),
                storage_key: None,
                legacy_filename: filename.map(str::to_string),
                legacy_path: path.map(|p| p.to_string_lossy().into_owned()),
                updated_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
    }
}

/// Write a file, creating parent directories.
#[allow(dead_code)]
pub fn write_file(path: &Path, data: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}
