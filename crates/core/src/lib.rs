//! Core domain types and shared logic for docvault.
//!
//! This crate defines the data model used across all other crates:
//! - Content checksums and storage keys
//! - Stored file records and legacy hints
//! - Content type and file name rules
//! - Legacy location descriptors
//! - Audit vocabulary and the record hash chain
//! - Configuration

pub mod audit;
pub mod config;
pub mod content_type;
pub mod error;
pub mod filename;
pub mod hash;
pub mod legacy;
pub mod storage_key;
pub mod stored_file;

pub use audit::{
    AuditCategory, AuditOperation, AuditResult, ChainFields, SecurityLevel, format_timestamp,
    parse_timestamp,
};
pub use config::AppConfig;
pub use content_type::content_type_for;
pub use error::{Error, Result};
pub use hash::ContentHash;
pub use legacy::{LegacyLocation, MatchStrategy};
pub use storage_key::StorageKey;
pub use stored_file::{LegacyHint, StoredFile};
