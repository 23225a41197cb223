//! Configuration types shared across crates.

use crate::legacy::LegacyLocation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on redundant backup copies per file.
pub const MAX_BACKUP_COPIES: usize = 8;

/// Upper bound on the last-resort search depth.
pub const MAX_SEARCH_DEPTH: u32 = 32;

/// Content store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Canonical root holding `originals/`, `backup/` and `versions/`.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Backup roots, one copy per root. Empty means `<root>/backup`.
    #[serde(default)]
    pub backup_roots: Vec<PathBuf>,
    /// Number of backup copies written per file.
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
    /// Per-copy timeout for backup writes, in seconds.
    #[serde(default = "default_backup_write_timeout_secs")]
    pub backup_write_timeout_secs: u64,
    /// Attempts at generating a non-colliding storage key.
    #[serde(default = "default_key_attempts")]
    pub key_attempts: u32,
    /// Minimum age of an interrupted temp file before startup recovery removes it.
    #[serde(default = "default_temp_file_grace_secs")]
    pub temp_file_grace_secs: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("./data/vault")
}

fn default_backup_count() -> usize {
    1
}

fn default_backup_write_timeout_secs() -> u64 {
    30
}

fn default_key_attempts() -> u32 {
    8
}

fn default_temp_file_grace_secs() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            backup_roots: Vec::new(),
            backup_count: default_backup_count(),
            backup_write_timeout_secs: default_backup_write_timeout_secs(),
            key_attempts: default_key_attempts(),
            temp_file_grace_secs: default_temp_file_grace_secs(),
        }
    }
}

impl StorageConfig {
    pub fn originals_dir(&self) -> PathBuf {
        self.root.join("originals")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    /// Backup roots in write order, truncated to `backup_count`.
    pub fn effective_backup_roots(&self) -> Vec<PathBuf> {
        let roots = if self.backup_roots.is_empty() {
            vec![self.root.join("backup")]
        } else {
            self.backup_roots.clone()
        };
        roots.into_iter().take(self.backup_count).collect()
    }

    pub fn backup_write_timeout(&self) -> Duration {
        Duration::from_secs(self.backup_write_timeout_secs)
    }

    pub fn temp_file_grace(&self) -> Duration {
        Duration::from_secs(self.temp_file_grace_secs)
    }

    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.backup_count == 0 {
            return Err("storage.backup_count must be at least 1".to_string());
        }
        if self.backup_count > MAX_BACKUP_COPIES {
            return Err(format!(
                "storage.backup_count must not exceed {MAX_BACKUP_COPIES}"
            ));
        }
        let available = self.backup_roots.len().max(1);
        if self.backup_count > available {
            return Err(format!(
                "storage.backup_count is {} but only {available} backup root(s) are configured",
                self.backup_count
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for root in &self.backup_roots {
            if root == &self.root || root.starts_with(self.originals_dir()) {
                return Err(format!(
                    "backup root {} overlaps the primary storage area",
                    root.display()
                ));
            }
            if !seen.insert(root) {
                return Err(format!("duplicate backup root {}", root.display()));
            }
        }
        if self.backup_write_timeout_secs == 0 {
            return Err("storage.backup_write_timeout_secs must be positive".to_string());
        }
        if self.key_attempts == 0 {
            return Err("storage.key_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Storage index database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database file path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
    /// Maximum connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a connection waits on a locked database, in seconds.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/docvault.db")
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("metadata.max_connections must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Legacy storage generations consulted by the resolver.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Ordered list of locations; earlier entries win ties.
    #[serde(default)]
    pub locations: Vec<LegacyLocation>,
}

/// Last-resort recursive search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Whether the search tier runs at all.
    #[serde(default = "default_search_enabled")]
    pub enabled: bool,
    /// Directory the search starts from. Defaults to the parent of `storage.root`.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Maximum directory depth below `base_dir`.
    #[serde(default = "default_search_max_depth")]
    pub max_depth: u32,
    /// Wall-clock bound for one search, in milliseconds.
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum directory entries examined per search.
    #[serde(default = "default_search_max_entries")]
    pub max_entries: u64,
}

fn default_search_enabled() -> bool {
    true
}

fn default_search_max_depth() -> u32 {
    6
}

fn default_search_timeout_ms() -> u64 {
    5_000
}

fn default_search_max_entries() -> u64 {
    100_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: default_search_enabled(),
            base_dir: None,
            max_depth: default_search_max_depth(),
            timeout_ms: default_search_timeout_ms(),
            max_entries: default_search_max_entries(),
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Directory the search starts from, or `None` when the tier is disabled.
    pub fn root(&self, storage_root: &Path) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        match (&self.base_dir, storage_root.parent()) {
            (Some(dir), _) => Some(dir.clone()),
            (None, Some(parent)) if !parent.as_os_str().is_empty() => Some(parent.to_path_buf()),
            (None, _) => Some(PathBuf::from(".")),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth > MAX_SEARCH_DEPTH {
            return Err(format!(
                "search.max_depth must not exceed {MAX_SEARCH_DEPTH}"
            ));
        }
        if self.enabled && self.timeout_ms == 0 {
            return Err("search.timeout_ms must be positive when search is enabled".to_string());
        }
        Ok(())
    }
}

/// Batch maintenance jobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Default number of index entries checked by one verify run.
    #[serde(default = "default_verify_limit")]
    pub verify_limit: u32,
    /// Default number of records attempted by one migration batch.
    #[serde(default = "default_migrate_batch_size")]
    pub migrate_batch_size: u32,
    /// Minimum age before an unreferenced file is swept, in seconds.
    #[serde(default = "default_orphan_grace_period_secs")]
    pub orphan_grace_period_secs: u64,
    /// Directory for migration reports. `None` skips writing them.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

fn default_verify_limit() -> u32 {
    1_000
}

fn default_migrate_batch_size() -> u32 {
    100
}

fn default_orphan_grace_period_secs() -> u64 {
    86_400 // 24 hours
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            verify_limit: default_verify_limit(),
            migrate_batch_size: default_migrate_batch_size(),
            orphan_grace_period_secs: default_orphan_grace_period_secs(),
            report_dir: None,
        }
    }
}

impl MaintenanceConfig {
    pub fn orphan_grace_period(&self) -> time::Duration {
        let secs = i64::try_from(self.orphan_grace_period_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }
}

/// Audit log configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Actor recorded for operations started by batch jobs.
    #[serde(default = "default_system_actor")]
    pub system_actor: String,
}

fn default_system_actor() -> String {
    "system".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            system_actor: default_system_actor(),
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub legacy: LegacyConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl AppConfig {
    /// Create a configuration rooted entirely under `dir`.
    ///
    /// **For testing only.** The search tier is disabled.
    pub fn for_testing(dir: &Path) -> Self {
        Self {
            storage: StorageConfig {
                root: dir.join("vault"),
                backup_write_timeout_secs: 5,
                temp_file_grace_secs: 0,
                ..StorageConfig::default()
            },
            metadata: MetadataConfig {
                path: dir.join("docvault.db"),
                ..MetadataConfig::default()
            },
            search: SearchConfig {
                enabled: false,
                timeout_ms: 2_000,
                ..SearchConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.metadata.validate()?;
        self.search.validate()
    }
}
