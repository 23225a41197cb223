//! Locating readable copies and repairing the primary.
//!
//! Resolution walks a fixed precedence, stopping at the first readable copy
//! whose checksum matches:
//!
//! 1. the recorded primary path
//! 2. each backup path, in order
//! 3. alternates the index has discovered before
//! 4. configured legacy locations (exact name, then stripped-prefix match)
//! 5. a bounded search under the search root (by default the parent of the storage root)
//!
//! A hit after tier 1 is copied back to the canonical primary path.

use crate::error::{StorageError, StorageResult};
use crate::fs::{self, Probe};
use crate::layout::StorageLayout;
use crate::search::{self, SearchBounds};
use bytes::Bytes;
use docvault_core::config::SearchConfig;
use docvault_core::filename::strip_unique_prefix;
use docvault_core::hash::ContentHash;
use docvault_core::legacy::{LegacyLocation, match_stripped};
use docvault_core::storage_key::StorageKey;
use docvault_core::stored_file::LegacyHint;
use docvault_metadata::MetadataStore;
use docvault_metadata::models::{OwningRecordRow, StorageIndexEntry};
use docvault_metadata::repos::{IndexRepo, RecordRepo};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Which tier produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    Primary,
    Backup,
    IndexAlternate,
    /// Path recorded by a pre-key owning record.
    Recorded,
    Legacy,
    Search,
}

/// A readable, verified copy.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    /// Absent for records that predate storage keys.
    pub storage_key: Option<StorageKey>,
    /// Where the content can be read now.
    pub path: PathBuf,
    pub tier: ResolutionTier,
    /// Whether the primary was rewritten from `found_at`.
    pub repaired: bool,
    pub found_at: PathBuf,
    #[serde(skip)]
    pub content: Bytes,
}

struct Found {
    tier: ResolutionTier,
    path: PathBuf,
    data: Bytes,
}

/// Bookkeeping across tiers: skips repeated paths and remembers why candidates failed.
#[derive(Default)]
struct Attempts {
    tried: HashSet<PathBuf>,
    mismatch: Option<(PathBuf, String)>,
    unreadable: Option<(PathBuf, std::io::Error)>,
}

impl Attempts {
    async fn try_path(&mut self, path: &Path, expected: Option<&ContentHash>) -> Option<Bytes> {
        if !self.tried.insert(path.to_path_buf()) {
            return None;
        }
        match fs::probe(path).await {
            Probe::Missing => None,
            Probe::Unreadable(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Copy exists but is unreadable");
                if self.unreadable.is_none() {
                    self.unreadable = Some((path.to_path_buf(), e));
                }
                None
            }
            Probe::Found(data) => {
                let Some(expected) = expected else {
                    return Some(data);
                };
                let actual = ContentHash::compute(&data);
                if &actual == expected {
                    return Some(data);
                }
                tracing::warn!(
                    path = %path.display(),
                    expected = %expected.to_hex(),
                    actual = %actual.to_hex(),
                    "Copy does not match recorded checksum"
                );
                if self.mismatch.is_none() {
                    self.mismatch = Some((path.to_path_buf(), actual.to_hex()));
                }
                None
            }
        }
    }

    /// The error to report when no tier produced a copy.
    ///
    /// A corrupt copy outranks an unreadable one, which outranks absence.
    fn into_error(self, subject: &str, expected: Option<&ContentHash>) -> StorageError {
        if let Some((path, actual)) = self.mismatch {
            return StorageError::ChecksumMismatch {
                path,
                expected: expected.map(ContentHash::to_hex).unwrap_or_default(),
                actual,
            };
        }
        if let Some((path, source)) = self.unreadable {
            return StorageError::FileUnreadable { path, source };
        }
        StorageError::FileNotFound(format!(
            "no readable copy of {subject} ({} locations checked)",
            self.tried.len()
        ))
    }
}

/// Finds copies of stored files and repairs primaries.
pub struct Resolver {
    layout: StorageLayout,
    metadata: Arc<dyn MetadataStore>,
    legacy: Vec<LegacyLocation>,
    search_base: Option<PathBuf>,
    search_bounds: SearchBounds,
    search_timeout: Duration,
}

impl Resolver {
    pub fn new(
        layout: StorageLayout,
        metadata: Arc<dyn MetadataStore>,
        legacy: Vec<LegacyLocation>,
        search: &SearchConfig,
    ) -> Self {
        Self {
            search_base: search.root(layout.root()),
            search_bounds: SearchBounds {
                max_depth: search.max_depth,
                max_entries: search.max_entries,
            },
            search_timeout: search.timeout(),
            layout,
            metadata,
            legacy,
        }
    }

    /// Resolve a storage key to a verified copy, repairing the primary if needed.
    #[tracing::instrument(skip(self), fields(storage_key = %key))]
    pub async fn resolve(&self, key: &StorageKey) -> StorageResult<Resolution> {
        let entry = self.metadata.require_entry(key.as_str()).await?;
        let expected = expected_checksum(&entry)?;
        let mut attempts = Attempts::default();

        let Some(found) = self.locate(&entry, expected.as_ref(), &mut attempts).await else {
            return Err(attempts.into_error(key.as_str(), expected.as_ref()));
        };
        if found.tier == ResolutionTier::Primary {
            return Ok(Resolution {
                storage_key: Some(key.clone()),
                path: found.path.clone(),
                tier: found.tier,
                repaired: false,
                found_at: found.path,
                content: found.data,
            });
        }
        self.repair(key, &entry, expected.as_ref(), found).await
    }

    /// Locate a verified copy of a key without touching the primary or the index.
    pub async fn locate_key(&self, key: &StorageKey) -> StorageResult<Resolution> {
        let entry = self.metadata.require_entry(key.as_str()).await?;
        let expected = expected_checksum(&entry)?;
        let mut attempts = Attempts::default();

        match self.locate(&entry, expected.as_ref(), &mut attempts).await {
            Some(found) => Ok(Resolution {
                storage_key: Some(key.clone()),
                path: found.path.clone(),
                tier: found.tier,
                repaired: false,
                found_at: found.path,
                content: found.data,
            }),
            None => Err(attempts.into_error(key.as_str(), expected.as_ref())),
        }
    }

    /// Resolve a legacy hint.
    ///
    /// A hint whose record has since received a storage key resolves through
    /// that key. Otherwise nothing is rewritten.
    pub async fn resolve_legacy(&self, hint: &LegacyHint) -> StorageResult<Resolution> {
        if let Some(record_id) = hint.record_id.as_deref()
            && let Some(record) = self.metadata.get_record(record_id).await?
            && let Some(key) = record.storage_key.as_deref()
        {
            return self.resolve(&StorageKey::parse(key)?).await;
        }
        self.locate_hint(hint).await
    }

    /// Resolve whatever file an owning record references.
    pub async fn resolve_record(&self, record_id: &str) -> StorageResult<Resolution> {
        let record = self
            .metadata
            .get_record(record_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("record {record_id}")))?;
        if let Some(key) = record.storage_key.as_deref() {
            return self.resolve(&StorageKey::parse(key)?).await;
        }
        let hint = legacy_hint(&record).ok_or_else(|| {
            StorageError::InvalidRecord(format!("record {record_id} references no file"))
        })?;
        self.locate_hint(&hint).await
    }

    /// Locate a copy for a hint: recorded path, then legacy locations, then search.
    pub(crate) async fn locate_hint(&self, hint: &LegacyHint) -> StorageResult<Resolution> {
        let mut attempts = Attempts::default();

        if let Some(recorded) = hint.recorded_path.as_deref()
            && let Some(data) = attempts.try_path(recorded, None).await
        {
            return Ok(Resolution {
                storage_key: None,
                path: recorded.to_path_buf(),
                tier: ResolutionTier::Recorded,
                repaired: false,
                found_at: recorded.to_path_buf(),
                content: data,
            });
        }

        let mut targets = Vec::new();
        push_target(&mut targets, &hint.filename);
        if let Some(name) = hint
            .recorded_path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
        {
            push_target(&mut targets, name);
        }

        let found = match self.find_in_legacy(&targets, None, &mut attempts).await {
            Some(found) => Some(found),
            None => self.find_by_search(&targets, None, &mut attempts).await,
        };
        match found {
            Some(found) => Ok(Resolution {
                storage_key: None,
                path: found.path.clone(),
                tier: found.tier,
                repaired: false,
                found_at: found.path,
                content: found.data,
            }),
            None => Err(attempts.into_error(&hint.subject(), None)),
        }
    }

    async fn locate(
        &self,
        entry: &StorageIndexEntry,
        expected: Option<&ContentHash>,
        attempts: &mut Attempts,
    ) -> Option<Found> {
        let tiers = [
            (ResolutionTier::Primary, std::slice::from_ref(&entry.primary_path)),
            (ResolutionTier::Backup, entry.backup_paths.as_slice()),
            (
                ResolutionTier::IndexAlternate,
                entry.known_alternate_paths.as_slice(),
            ),
        ];
        for (tier, paths) in tiers {
            for path in paths {
                let path = PathBuf::from(path);
                if let Some(data) = attempts.try_path(&path, expected).await {
                    return Some(Found { tier, path, data });
                }
            }
        }

        let mut targets = Vec::new();
        if let Some(name) = Path::new(&entry.primary_path)
            .file_name()
            .and_then(|n| n.to_str())
        {
            push_target(&mut targets, name);
        }
        push_target(&mut targets, &entry.original_name);

        if let Some(found) = self.find_in_legacy(&targets, expected, attempts).await {
            return Some(found);
        }
        self.find_by_search(&targets, expected, attempts).await
    }

    async fn find_in_legacy(
        &self,
        targets: &[String],
        expected: Option<&ContentHash>,
        attempts: &mut Attempts,
    ) -> Option<Found> {
        for location in self.legacy.iter().filter(|l| l.strategy.allows_exact()) {
            for target in targets {
                let path = location.path.join(target);
                if let Some(data) = attempts.try_path(&path, expected).await {
                    return Some(Found {
                        tier: ResolutionTier::Legacy,
                        path,
                        data,
                    });
                }
            }
        }

        for location in self.legacy.iter().filter(|l| l.strategy.allows_stripped()) {
            let names = match fs::list_file_names(&location.path).await {
                Ok(names) => names,
                Err(e) => {
                    tracing::debug!(
                        location = %location.path.display(),
                        error = %e,
                        "Skipping unreadable legacy location"
                    );
                    continue;
                }
            };
            for target in targets {
                let stripped = strip_unique_prefix(target).unwrap_or(target);
                // Names are sorted; the stable sort keeps that order within a match kind.
                let mut matches: Vec<_> = names
                    .iter()
                    .filter(|name| !fs::is_temp_file(name))
                    .filter_map(|name| match_stripped(name, stripped).map(|m| (m, name)))
                    .collect();
                matches.sort_by_key(|(kind, _)| *kind);

                for (_, name) in matches {
                    let path = location.path.join(name);
                    if let Some(data) = attempts.try_path(&path, expected).await {
                        return Some(Found {
                            tier: ResolutionTier::Legacy,
                            path,
                            data,
                        });
                    }
                }
            }
        }
        None
    }

    async fn find_by_search(
        &self,
        targets: &[String],
        expected: Option<&ContentHash>,
        attempts: &mut Attempts,
    ) -> Option<Found> {
        let base = self.search_base.as_deref()?;
        let search = search::find_by_name(base, targets, self.search_bounds);
        let candidates = match tokio::time::timeout(self.search_timeout, search).await {
            Ok(candidates) => candidates,
            Err(_) => {
                tracing::warn!(
                    base = %base.display(),
                    timeout_ms = self.search_timeout.as_millis() as u64,
                    "File search timed out"
                );
                return None;
            }
        };
        for path in candidates {
            if let Some(data) = attempts.try_path(&path, expected).await {
                return Some(Found {
                    tier: ResolutionTier::Search,
                    path,
                    data,
                });
            }
        }
        None
    }

    async fn repair(
        &self,
        key: &StorageKey,
        entry: &StorageIndexEntry,
        expected: Option<&ContentHash>,
        found: Found,
    ) -> StorageResult<Resolution> {
        let target = self.layout.primary_path(key, &entry.original_name);
        fs::write_atomic(&target, &found.data).await.map_err(|e| {
            StorageError::WriteFailure(format!(
                "failed to repair {key} at {}: {e}",
                target.display()
            ))
        })?;

        if let Some(expected) = expected {
            let written =
                tokio::fs::read(&target)
                    .await
                    .map_err(|source| StorageError::FileUnreadable {
                        path: target.clone(),
                        source,
                    })?;
            let actual = ContentHash::compute(&written);
            if &actual != expected {
                return Err(StorageError::RepairVerificationFailed {
                    key: key.to_string(),
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                });
            }
        }

        let found_at = found.path.to_string_lossy();
        self.metadata
            .set_primary_path(
                key.as_str(),
                &target.to_string_lossy(),
                &found_at,
                OffsetDateTime::now_utc(),
            )
            .await?;
        if found.path != target {
            self.metadata
                .record_alternate_path(key.as_str(), &found_at)
                .await?;
        }

        tracing::info!(
            storage_key = %key,
            tier = ?found.tier,
            found_at = %found.path.display(),
            primary = %target.display(),
            "Repaired primary copy"
        );
        Ok(Resolution {
            storage_key: Some(key.clone()),
            path: target,
            tier: found.tier,
            repaired: true,
            found_at: found.path,
            content: found.data,
        })
    }
}

/// Parse the recorded checksum of an entry.
pub(crate) fn expected_checksum(entry: &StorageIndexEntry) -> StorageResult<Option<ContentHash>> {
    entry
        .checksum
        .as_deref()
        .map(|hex| {
            ContentHash::from_hex(hex).map_err(|e| {
                StorageError::InvalidRecord(format!(
                    "bad checksum for {}: {e}",
                    entry.storage_key
                ))
            })
        })
        .transpose()
}

/// The legacy hint carried by a record without a storage key.
pub fn legacy_hint(record: &OwningRecordRow) -> Option<LegacyHint> {
    let recorded = record.legacy_path.as_deref().map(PathBuf::from);
    let filename = record.legacy_filename.clone().or_else(|| {
        recorded
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .map(str::to_string)
    })?;
    let mut hint = LegacyHint::new(filename).with_record_id(&record.record_id);
    if let Some(path) = recorded {
        hint = hint.with_recorded_path(path);
    }
    Some(hint)
}

/// Add a lookup name if it is a single path component not already present.
fn push_target(targets: &mut Vec<String>, name: &str) {
    let plain = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if plain && !targets.iter().any(|t| t == name) {
        targets.push(name.to_string());
    }
}
