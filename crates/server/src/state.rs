//! Application state shared across handlers.

use crate::catalog::Catalog;
use crate::search::SearchIndex;
use emporium_core::config::AppConfig;
use emporium_metadata::MetadataStore;
use emporium_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Catalog orchestration over storage, metadata, and search.
    pub catalog: Arc<Catalog>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        search: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(Catalog::new(storage, metadata, search)),
        }
    }
}
