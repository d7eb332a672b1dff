//! Base entity repository.

use crate::error::MetadataResult;
use crate::models::BaseEntityRow;
use async_trait::async_trait;
use emporium_core::reference::ArtifactRef;

/// Repository for base entity records.
#[async_trait]
pub trait BaseEntityRepo: Send + Sync {
    /// Find the base entity for the given ref (fully qualified or base).
    async fn find_base_entity(&self, url: &ArtifactRef) -> MetadataResult<BaseEntityRow>;

    /// Set the promulgated flag on a base entity.
    async fn set_promulgated(&self, url: &ArtifactRef, promulgated: bool) -> MetadataResult<()>;
}
