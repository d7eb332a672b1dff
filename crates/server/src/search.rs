//! Search index write-through contract.
//!
//! The search service itself is an external collaborator; the ingest
//! pipeline only depends on its write contract: an entity insert
//! happens-before the index upsert, and an upsert failure triggers a
//! compensating delete of the entity row.

use async_trait::async_trait;
use emporium_metadata::models::EntityRow;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Search index failure.
#[derive(Debug, Error)]
#[error("search index error: {0}")]
pub struct SearchError(pub String);

/// Write-through interface to the secondary search index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or update the index document for an entity.
    async fn upsert(&self, entity: &EntityRow) -> Result<(), SearchError>;
}

/// A search index that accepts every document. Used when no search
/// deployment is configured.
pub struct NullSearchIndex;

#[async_trait]
impl SearchIndex for NullSearchIndex {
    async fn upsert(&self, _entity: &EntityRow) -> Result<(), SearchError> {
        Ok(())
    }
}

/// A search index recording every upsert, with a switchable failure mode.
/// Test-only collaborator for exercising the compensating delete.
#[derive(Default)]
pub struct RecordingSearchIndex {
    pub upserts: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl SearchIndex for RecordingSearchIndex {
    async fn upsert(&self, entity: &EntityRow) -> Result<(), SearchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SearchError("index unavailable".to_string()));
        }
        self.upserts.lock().unwrap().push(entity.url.clone());
        Ok(())
    }
}
