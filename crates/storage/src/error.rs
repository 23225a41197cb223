//! Storage error types.

use docvault_metadata::MetadataError;
use std::path::PathBuf;
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A copy could not be persisted.
    #[error("write failed: {0}")]
    WriteFailure(String),

    /// No location accepted the write.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Resolution exhausted every tier.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A path exists but could not be read.
    #[error("file unreadable at {}: {source}", .path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch at {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The repaired primary copy does not match the recorded checksum.
    #[error("repair of {key} did not restore integrity: expected {expected}, got {actual}")]
    RepairVerificationFailed {
        key: String,
        expected: String,
        actual: String,
    },

    /// The storage index is damaged. Fatal at startup.
    #[error("storage index is corrupt: {0}")]
    IndexCorrupt(String),

    /// Unknown storage key or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// An index entry holds values that cannot be interpreted.
    #[error("invalid index record: {0}")]
    InvalidRecord(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("metadata error: {0}")]
    Metadata(MetadataError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<MetadataError> for StorageError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::IndexCorrupt(msg) => Self::IndexCorrupt(msg),
            MetadataError::NotFound(msg) => Self::NotFound(msg),
            MetadataError::Config(msg) => Self::Config(msg),
            other => Self::Metadata(other),
        }
    }
}

impl From<docvault_core::Error> for StorageError {
    fn from(err: docvault_core::Error) -> Self {
        match err {
            docvault_core::Error::InvalidStorageKey(msg) => Self::InvalidKey(msg),
            other => Self::InvalidRecord(other.to_string()),
        }
    }
}

impl StorageError {
    /// Short machine-readable name, used in audit details and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WriteFailure(_) => "write_failure",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::FileNotFound(_) => "file_not_found",
            Self::FileUnreadable { .. } => "file_unreadable",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::RepairVerificationFailed { .. } => "repair_verification_failed",
            Self::IndexCorrupt(_) => "index_corrupt",
            Self::NotFound(_) => "not_found",
            Self::InvalidRecord(_) => "invalid_record",
            Self::InvalidKey(_) => "invalid_key",
            Self::Metadata(_) => "metadata",
            Self::Config(_) => "config",
        }
    }

    /// Whether the caller should present this as "file unavailable".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_)
                | Self::FileUnreadable { .. }
                | Self::ChecksumMismatch { .. }
                | Self::RepairVerificationFailed { .. }
        )
    }
}
