//! Storage index and audit persistence for docvault.
//!
//! This crate provides the durable side of the storage subsystem:
//! - Storage index entries with backup and discovered alternate paths
//! - Owning record references, including pre-key legacy hints
//! - File version history
//! - The hash-chained audit log

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use docvault_core::config::MetadataConfig;
use std::sync::Arc;
use std::time::Duration;

/// Open the metadata store described by the configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;
    let store = SqliteStore::new(
        &config.path,
        config.max_connections,
        Duration::from_secs(config.busy_timeout_secs),
    )
    .await?;
    Ok(Arc::new(store) as Arc<dyn MetadataStore>)
}
