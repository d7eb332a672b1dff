//! Entity repository.

use crate::error::MetadataResult;
use crate::models::{BaseEntityRow, EntityRow};
use async_trait::async_trait;
use emporium_core::reference::ArtifactRef;
use emporium_core::zipfile::{CachedZipFile, FileId};

/// Repository for entity records.
#[async_trait]
pub trait EntityRepo: Send + Sync {
    /// Insert an entity, creating its base entity first if absent.
    ///
    /// A duplicate base entity is ignored; a duplicate entity primary key
    /// surfaces as [`crate::MetadataError::DuplicateEntity`].
    async fn insert_entity(&self, entity: &EntityRow, base: &BaseEntityRow) -> MetadataResult<()>;

    /// Find the entity with the given fully qualified ref.
    async fn find_entity(&self, url: &ArtifactRef) -> MetadataResult<EntityRow>;

    /// Find all entities matching the given ref pattern.
    ///
    /// A fully qualified pattern is a primary-key lookup; otherwise the
    /// base ref is queried and results are post-filtered with
    /// [`ArtifactRef::matches`].
    async fn find_entities(&self, pattern: &ArtifactRef) -> MetadataResult<Vec<EntityRow>>;

    /// Expand a ref pattern to the fully qualified refs it may refer to.
    async fn expand(&self, pattern: &ArtifactRef) -> MetadataResult<Vec<ArtifactRef>>;

    /// Delete an entity row. The base entity is left in place.
    async fn remove_entity(&self, url: &ArtifactRef) -> MetadataResult<()>;

    /// Atomically set one cached interior-file locator on an entity.
    async fn update_cached_file(
        &self,
        url: &ArtifactRef,
        file_id: FileId,
        zipf: &CachedZipFile,
    ) -> MetadataResult<()>;

    /// The highest promulgated revision recorded for `(name, series)`
    /// across all users, if any entity has been promulgated.
    async fn latest_promulgated_revision(
        &self,
        name: &str,
        series: &str,
    ) -> MetadataResult<Option<i64>>;
}
