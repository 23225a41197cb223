//! On-disk layout of the storage tree.

use docvault_core::config::StorageConfig;
use docvault_core::filename::sanitize;
use docvault_core::storage_key::StorageKey;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Resolves where each kind of copy lives.
///
/// ```text
/// <root>/originals/<shard>/<key>_<name>
/// <backup_root>/<shard>/<key>_<name>
/// <root>/versions/<key>/<timestamp>_<name>
/// ```
#[derive(Clone, Debug)]
pub struct StorageLayout {
    root: PathBuf,
    originals: PathBuf,
    versions: PathBuf,
    backup_roots: Vec<PathBuf>,
}

impl StorageLayout {
    /// Build a layout from configuration. Relative roots are made absolute.
    pub fn new(config: &StorageConfig) -> std::io::Result<Self> {
        let root = std::path::absolute(&config.root)?;
        let backup_roots = config
            .effective_backup_roots()
            .iter()
            .map(std::path::absolute)
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self {
            originals: root.join("originals"),
            versions: root.join("versions"),
            root,
            backup_roots,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn originals_dir(&self) -> &Path {
        &self.originals
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions
    }

    pub fn backup_roots(&self) -> &[PathBuf] {
        &self.backup_roots
    }

    /// Canonical primary location of a key.
    pub fn primary_path(&self, key: &StorageKey, original_name: &str) -> PathBuf {
        self.originals
            .join(key.shard())
            .join(Self::file_name(key, original_name))
    }

    /// Backup location of a key under each configured backup root, in order.
    pub fn backup_paths(&self, key: &StorageKey, original_name: &str) -> Vec<PathBuf> {
        let name = Self::file_name(key, original_name);
        self.backup_roots
            .iter()
            .map(|root| root.join(key.shard()).join(&name))
            .collect()
    }

    /// Location for a snapshot of a superseded revision.
    pub fn version_path(
        &self,
        key: &StorageKey,
        original_name: &str,
        archived_at: OffsetDateTime,
    ) -> PathBuf {
        let stamp = archived_at.unix_timestamp_nanos() / 1_000;
        self.versions
            .join(key.as_str())
            .join(format!("{stamp}_{}", sanitize(original_name)))
    }

    /// Whether a path is under the current-generation originals tree.
    pub fn is_canonical(&self, path: &Path) -> bool {
        path.starts_with(&self.originals)
    }

    /// Whether a path is inside any directory the store writes into.
    pub fn is_managed(&self, path: &Path) -> bool {
        path.starts_with(&self.originals)
            || path.starts_with(&self.versions)
            || self.backup_roots.iter().any(|root| path.starts_with(root))
    }

    /// Directories the store writes into.
    pub fn managed_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.originals.clone(), self.versions.clone()];
        dirs.extend(self.backup_roots.iter().cloned());
        dirs
    }

    fn file_name(key: &StorageKey, original_name: &str) -> String {
        format!("{}_{}", key.as_str(), sanitize(original_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvault_core::hash::ContentHash;

    fn layout(root: &Path) -> StorageLayout {
        let config = StorageConfig {
            root: root.to_path_buf(),
            ..StorageConfig::default()
        };
        StorageLayout::new(&config).unwrap()
    }

    #[test]
    fn test_paths_are_sharded() {
        let temp = tempfile::tempdir().unwrap();
        let layout = layout(temp.path());
        let key = StorageKey::generate(&ContentHash::compute(b"abc"));

        let primary = layout.primary_path(&key, "report.pdf");
        assert_eq!(
            primary,
            temp.path()
                .join("originals")
                .join(key.shard())
                .join(format!("{key}_report.pdf"))
        );
        assert!(layout.is_canonical(&primary));

        let backups = layout.backup_paths(&key, "report.pdf");
        assert_eq!(backups.len(), 1);
        assert!(backups[0].starts_with(temp.path().join("backup")));
        assert!(!layout.is_canonical(&backups[0]));
    }

    #[test]
    fn test_names_are_sanitized() {
        let temp = tempfile::tempdir().unwrap();
        let layout = layout(temp.path());
        let key = StorageKey::generate(&ContentHash::compute(b"abc"));

        let primary = layout.primary_path(&key, "../../etc/passwd");
        assert!(primary.starts_with(layout.originals_dir()));
        assert_eq!(
            primary.file_name().unwrap().to_str().unwrap(),
            format!("{key}_passwd")
        );
    }

    #[test]
    fn test_version_path_under_key() {
        let temp = tempfile::tempdir().unwrap();
        let layout = layout(temp.path());
        let key = StorageKey::generate(&ContentHash::compute(b"abc"));
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        let path = layout.version_path(&key, "a.txt", at);
        assert_eq!(
            path,
            temp.path()
                .join("versions")
                .join(key.as_str())
                .join("1700000000000000_a.txt")
        );
    }
}
