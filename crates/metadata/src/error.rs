//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The index file is damaged. Fatal at startup.
    #[error("storage index is corrupt: {0}")]
    IndexCorrupt(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// SQLite primary result codes that mean the file itself is damaged.
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

impl MetadataError {
    /// Classify a database error, promoting file corruption to `IndexCorrupt`.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err
            && let Some(code) = db.code()
            && let Ok(code) = code.parse::<i32>()
            && matches!(code & 0xff, SQLITE_CORRUPT | SQLITE_NOTADB)
        {
            return Self::IndexCorrupt(db.message().to_string());
        }
        Self::Database(err)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_stay_database() {
        let err = MetadataError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err, MetadataError::Database(_)));
    }

    #[test]
    fn test_display() {
        let err = MetadataError::IndexCorrupt("file is not a database".to_string());
        assert_eq!(
            err.to_string(),
            "storage index is corrupt: file is not a database"
        );
    }
}
