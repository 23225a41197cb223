//! Bounded last-resort file search.

use crate::fs::is_temp_file;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Stop collecting once this many name matches are found.
const MAX_CANDIDATES: usize = 16;

/// Limits on a directory search.
#[derive(Debug, Clone, Copy)]
pub struct SearchBounds {
    pub max_depth: u32,
    pub max_entries: u64,
}

/// Breadth-first search under `base` for files named exactly one of `names`.
///
/// Entries are visited in sorted order within each directory, so the result
/// order is stable. Unreadable directories are skipped. Symlinks are not
/// followed. The caller bounds wall-clock time.
pub async fn find_by_name(base: &Path, names: &[String], bounds: SearchBounds) -> Vec<PathBuf> {
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut found = Vec::new();
    let mut visited = 0u64;
    let mut queue = VecDeque::from([(base.to_path_buf(), 0u32)]);

    while let Some((dir, depth)) = queue.pop_front() {
        let mut entries = match read_entries(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, path, is_dir) in entries {
            visited += 1;
            if visited > bounds.max_entries {
                tracing::debug!(base = %base.display(), visited, "Search entry limit reached");
                return found;
            }
            if is_dir {
                if depth < bounds.max_depth {
                    queue.push_back((path, depth + 1));
                }
            } else if wanted.contains(name.as_str()) && !is_temp_file(&name) {
                found.push(path);
                if found.len() >= MAX_CANDIDATES {
                    return found;
                }
            }
        }
    }
    found
}

async fn read_entries(dir: &Path) -> std::io::Result<Vec<(String, PathBuf, bool)>> {
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if !(file_type.is_dir() || file_type.is_file()) {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        out.push((name, entry.path(), file_type.is_dir()));
    }
    Ok(out)
}
