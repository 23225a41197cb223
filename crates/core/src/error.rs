//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid storage key: {0}")]
    InvalidStorageKey(String),

    #[error("invalid audit operation: {0}")]
    InvalidAuditOperation(String),

    #[error("invalid audit result: {0}")]
    InvalidAuditResult(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
