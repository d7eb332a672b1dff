//! Metadata store abstraction and implementations for Emporium.
//!
//! This crate provides the control-plane data model:
//! - Entity records, one per uploaded archive revision
//! - Base entity records, one per base ref (ACLs, promulgation)
//! - Structured logs associated with refs
//! - Token-interned statistics counters

pub mod error;
pub mod models;
pub mod repos;
pub mod stats;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{BaseEntityRepo, EntityRepo, LogRepo, StatsRepo};
pub use stats::{StatsCache, entity_stats_key};
pub use store::{MetadataStore, SqliteStore};

use emporium_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
