//! Filesystem primitives: atomic writes, probing reads and tree walks.

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

const TEMP_MARKER: &str = ".tmp.";

/// Write `data` to `path` so readers see either the old file or the complete new one.
///
/// The bytes go to a uniquely named sibling temp file, are synced, then renamed
/// over `path`. Concurrent writers of the same path never interleave.
#[instrument(skip(data), fields(path = %path.display(), size = data.len()))]
pub async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = temp_path_for(path);
    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        // Flush to disk before the rename publishes the file.
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

fn temp_path_for(path: &Path) -> PathBuf {
    let temp_name = format!("{TEMP_MARKER}{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or_else(|| temp_name.clone()),
    )
}

/// Whether a file name was produced by [`write_atomic`] as a temp file.
pub fn is_temp_file(name: &str) -> bool {
    name.rsplit_once(TEMP_MARKER)
        .is_some_and(|(_, suffix)| Uuid::parse_str(suffix).is_ok())
}

/// Outcome of reading a candidate location.
#[derive(Debug)]
pub enum Probe {
    /// Nothing (or not a regular file) at the path.
    Missing,
    /// The path exists but reading it failed.
    Unreadable(io::Error),
    Found(Bytes),
}

/// Read a candidate location, separating "absent" from "present but unreadable".
pub async fn probe(path: &Path) -> Probe {
    match fs::metadata(path).await {
        Ok(meta) if !meta.is_file() => return Probe::Missing,
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Probe::Missing,
        Err(e) => return Probe::Unreadable(e),
    }
    match fs::read(path).await {
        Ok(data) => Probe::Found(Bytes::from(data)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Probe::Missing,
        Err(e) => Probe::Unreadable(e),
    }
}

/// Remove a file if present. Returns whether a file was removed.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a file, logging instead of failing. Returns whether a file was removed.
pub async fn remove_best_effort(path: &Path) -> bool {
    match remove_if_exists(path).await {
        Ok(removed) => removed,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
            false
        }
    }
}

/// A regular file found by [`walk_files`].
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Recursively list regular files under `root`, sorted by path.
///
/// Symlinks are not followed. A missing root yields an empty list.
pub async fn walk_files(root: &Path) -> io::Result<Vec<WalkedFile>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                let meta = entry.metadata().await?;
                files.push(WalkedFile {
                    path: entry.path(),
                    size: meta.len(),
                    modified: meta.modified().ok(),
                });
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Regular file names directly inside `dir`, sorted.
pub async fn list_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file()
            && let Some(name) = entry.file_name().to_str()
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Statistics from [`recover_temp_files`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RecoveryStats {
    pub cleaned: u64,
    pub kept_recent: u64,
    pub errors: Vec<String>,
}

/// Remove temp files left behind by interrupted writes.
///
/// Temp files younger than `min_age` may belong to a writer that is still
/// running and are kept.
pub async fn recover_temp_files(root: &Path, min_age: Duration) -> RecoveryStats {
    let mut stats = RecoveryStats::default();
    let files = match walk_files(root).await {
        Ok(files) => files,
        Err(e) => {
            stats
                .errors
                .push(format!("failed to walk {}: {e}", root.display()));
            return stats;
        }
    };
    let now = SystemTime::now();

    for file in files {
        let Some(name) = file.path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_temp_file(name) {
            continue;
        }
        let age = file
            .modified
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or(Duration::MAX);
        if age < min_age {
            stats.kept_recent += 1;
            continue;
        }
        match fs::remove_file(&file.path).await {
            Ok(()) => {
                stats.cleaned += 1;
                tracing::debug!(path = %file.path.display(), "Removed interrupted temp file");
            }
            Err(e) => stats
                .errors
                .push(format!("failed to remove {}: {e}", file.path.display())),
        }
    }

    if stats.cleaned > 0 || !stats.errors.is_empty() {
        tracing::info!(
            root = %root.display(),
            cleaned = stats.cleaned,
            errors = stats.errors.len(),
            "Temp file recovery completed"
        );
    }
    stats
}
