//! Document storage and integrity for docvault.
//!
//! This crate provides:
//! - A redundant content store (primary plus backup copies, atomic writes)
//! - A resolver that finds surviving copies and repairs lost primaries
//! - Integrity verification and generation migration batch jobs
//! - The hash-chained audit log service
//! - Orphaned file cleanup
//! - The `Vault` facade tying these together

pub mod audit;
pub mod content_store;
pub mod error;
pub mod fs;
pub mod layout;
pub mod migrator;
pub mod resolver;
pub mod search;
pub mod sweep;
pub mod verifier;
pub mod vault;

pub use audit::{AuditLog, ChainReport, ExportFormat, ExportSummary};
pub use content_store::{AreaStats, ContentStore, DeleteReport, StorageStats};
pub use error::{StorageError, StorageResult};
pub use layout::StorageLayout;
pub use migrator::{MigrationFailure, MigrationReport, Migrator};
pub use resolver::{Resolution, ResolutionTier, Resolver};
pub use sweep::SweepReport;
pub use verifier::{IntegrityVerifier, VerifyFailure, VerifyOutcome, VerifyReport};
pub use vault::Vault;

use docvault_core::config::AppConfig;

/// Open a vault from configuration.
pub async fn from_config(config: &AppConfig) -> StorageResult<Vault> {
    Vault::open(config.clone()).await
}
