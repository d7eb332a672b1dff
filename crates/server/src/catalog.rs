//! Catalog orchestration over the blob store, metadata store, and search
//! index.
//!
//! The catalog owns the cross-store consistency rules: entity rows always
//! point at a stored blob, every entity has a base entity, a name never
//! holds both charms and bundles, and promulgated revisions grow
//! monotonically per `(name, series)` across users.

use crate::error::{ApiError, ApiResult};
use crate::search::SearchIndex;
use emporium_core::bundle::{Bundle, CharmView};
use emporium_core::charm::{Charm, CharmMetadata};
use emporium_core::reference::ArtifactRef;
use emporium_core::zipfile::{self, CachedZipFile, FileId};
use emporium_core::{BUNDLE_SERIES, BlobHash};
use emporium_metadata::models::{Acl, BaseEntityRow, EntityRow, Json, LogLevel};
use emporium_metadata::{
    BaseEntityRepo, EntityRepo, LogRepo, MetadataError, MetadataStore, StatsRepo,
    entity_stats_key,
};
use emporium_storage::{BlobStore, ByteStream};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

/// Parameters held in common between [`Catalog::add_charm`] and
/// [`Catalog::add_bundle`].
pub struct AddParams {
    /// The fully qualified id to associate with the stored entity.
    pub url: ArtifactRef,
    /// The name of the entity's archive blob.
    pub blob_name: String,
    /// The hash of the entity's archive blob.
    pub blob_hash: BlobHash,
    /// The size of the entity's archive blob in bytes.
    pub blob_size: u64,
    /// The promulgated id of the entity, if the base entity is promulgated.
    pub promulgated: Option<(ArtifactRef, i64)>,
}

/// The underlying charm and blob data stores.
pub struct Catalog {
    pub storage: Arc<dyn BlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub search: Arc<dyn SearchIndex>,
    /// Central-directory scans performed for cached member lookups. Cached
    /// locators keep this bounded at one per entity and file id.
    pub directory_scans: AtomicU64,
}

impl Catalog {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        search: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            storage,
            metadata,
            search,
            directory_scans: AtomicU64::new(0),
        }
    }

    /// Resolve a ref to a stored entity. A partial ref resolves to the
    /// highest stored revision, breaking series ties lexicographically.
    pub async fn resolve(&self, url: &ArtifactRef) -> ApiResult<EntityRow> {
        if url.is_fully_qualified() {
            return Ok(self.metadata.find_entity(url).await?);
        }
        let entities = self.metadata.find_entities(url).await?;
        entities
            .into_iter()
            .max_by(|a, b| {
                a.revision
                    .cmp(&b.revision)
                    .then_with(|| a.series.cmp(&b.series))
            })
            .ok_or_else(|| ApiError::NotFound(format!("entity {url} not found")))
    }

    /// Open an entity's archive blob for streaming, returning the stream
    /// and its size.
    pub async fn open_blob(&self, entity: &EntityRow) -> ApiResult<(ByteStream, u64)> {
        let size = self.storage.size(&entity.blob_name).await?;
        let stream = self.storage.get_stream(&entity.blob_name).await?;
        Ok((stream, size))
    }

    /// Add a charm entity for an already-stored blob.
    pub async fn add_charm(&self, charm: &Charm, p: AddParams) -> ApiResult<EntityRow> {
        if p.url.series == BUNDLE_SERIES {
            return Err(ApiError::Internal(format!(
                "charm added with invalid id {}",
                p.url
            )));
        }
        let entity = EntityRow {
            url: p.url.to_string(),
            base_url: p.url.base_ref().to_string(),
            user: p.url.user.clone(),
            name: p.url.name.clone(),
            series: p.url.series.clone(),
            revision: p.url.revision,
            blob_name: p.blob_name.clone(),
            blob_hash: p.blob_hash.to_hex(),
            size: p.blob_size as i64,
            upload_time: OffsetDateTime::now_utc(),
            charm_meta: Some(Json(charm.meta.clone())),
            charm_config: Some(Json(charm.config.clone().unwrap_or_default())),
            charm_actions: Some(Json(charm.actions.clone().unwrap_or_default())),
            charm_provided_interfaces: Some(Json(CharmMetadata::interfaces(&charm.meta.provides))),
            charm_required_interfaces: Some(Json(CharmMetadata::interfaces(&charm.meta.requires))),
            bundle_data: None,
            bundle_readme: None,
            bundle_charms: None,
            bundle_unit_count: None,
            bundle_machine_count: None,
            contents: Json(BTreeMap::new()),
            promulgated_url: p.promulgated.as_ref().map(|(url, _)| url.to_string()),
            promulgated_revision: p.promulgated.as_ref().map(|(_, rev)| *rev).unwrap_or(-1),
        };

        // A charm may not take a name already used by a bundle. The check is
        // racy; the entity primary key is the final arbiter.
        let existing = self.metadata.find_entities(&p.url.base_ref()).await?;
        if let Some(other) = existing.iter().find(|e| e.series == BUNDLE_SERIES) {
            return Err(ApiError::InvalidArchive(format!(
                "charm name duplicates bundle name {}",
                other.url
            )));
        }
        self.insert_entity(&entity).await?;
        Ok(entity)
    }

    /// Add a bundle entity for an already-stored blob.
    pub async fn add_bundle(&self, bundle: &Bundle, p: AddParams) -> ApiResult<EntityRow> {
        if p.url.series != BUNDLE_SERIES {
            return Err(ApiError::Internal(format!(
                "bundle added with invalid id {}",
                p.url
            )));
        }
        let entity = EntityRow {
            url: p.url.to_string(),
            base_url: p.url.base_ref().to_string(),
            user: p.url.user.clone(),
            name: p.url.name.clone(),
            series: p.url.series.clone(),
            revision: p.url.revision,
            blob_name: p.blob_name.clone(),
            blob_hash: p.blob_hash.to_hex(),
            size: p.blob_size as i64,
            upload_time: OffsetDateTime::now_utc(),
            charm_meta: None,
            charm_config: None,
            charm_actions: None,
            charm_provided_interfaces: None,
            charm_required_interfaces: None,
            bundle_data: Some(Json(bundle.data.clone())),
            bundle_readme: Some(bundle.readme.clone()),
            bundle_charms: Some(Json(bundle.data.required_charms())),
            bundle_unit_count: Some(bundle.data.unit_count()),
            bundle_machine_count: Some(bundle.data.machine_count()),
            contents: Json(BTreeMap::new()),
            promulgated_url: p.promulgated.as_ref().map(|(url, _)| url.to_string()),
            promulgated_revision: p.promulgated.as_ref().map(|(_, rev)| *rev).unwrap_or(-1),
        };

        // A bundle may not take a name already used by a charm.
        let existing = self.metadata.find_entities(&p.url.base_ref()).await?;
        if let Some(other) = existing.iter().find(|e| e.series != BUNDLE_SERIES) {
            return Err(ApiError::InvalidArchive(format!(
                "bundle name duplicates charm name {}",
                other.url
            )));
        }
        self.insert_entity(&entity).await?;
        Ok(entity)
    }

    async fn insert_entity(&self, entity: &EntityRow) -> ApiResult<()> {
        let mut read_perm = vec!["everyone".to_string()];
        let mut write_perm = Vec::new();
        if !entity.user.is_empty() {
            read_perm.push(entity.user.clone());
            write_perm.push(entity.user.clone());
        }
        let base = BaseEntityRow {
            url: entity.base_url.clone(),
            user: entity.user.clone(),
            name: entity.name.clone(),
            public: true,
            acls: Json(Acl {
                read: read_perm,
                write: write_perm,
            }),
            promulgated: entity.promulgated_url.is_some(),
        };
        self.metadata
            .insert_entity(entity, &base)
            .await
            .map_err(|e| match e {
                MetadataError::DuplicateEntity(key) => ApiError::DuplicateUpload(key),
                other => other.into(),
            })?;
        Ok(())
    }

    /// Remove an entity row. The base entity stays.
    pub async fn remove_entity(&self, url: &ArtifactRef) -> ApiResult<()> {
        self.metadata.remove_entity(url).await?;
        Ok(())
    }

    /// Compute the promulgated ref for a newly uploaded id, or None when the
    /// base entity is absent or not promulgated.
    pub async fn promulgated_ref(
        &self,
        url: &ArtifactRef,
    ) -> ApiResult<Option<(ArtifactRef, i64)>> {
        let base = match self.metadata.find_base_entity(url).await {
            Ok(base) => base,
            Err(MetadataError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !base.promulgated {
            return Ok(None);
        }
        let latest = self
            .metadata
            .latest_promulgated_revision(&url.name, &url.series)
            .await?;
        let revision = latest.map(|r| r + 1).unwrap_or(0);
        let mut promulgated = url.clone();
        promulgated.user = String::new();
        promulgated.revision = revision;
        Ok(Some((promulgated, revision)))
    }

    /// Resolve bundle-referenced charm ids to verification views.
    ///
    /// Unparseable ids and ids with no stored entity are silently dropped;
    /// bundle verification reports them in context. Other failures
    /// propagate.
    pub async fn bundle_charms(
        &self,
        ids: &[String],
    ) -> ApiResult<BTreeMap<String, CharmView>> {
        let mut charms = BTreeMap::new();
        for id in ids {
            let Ok(url) = ArtifactRef::parse(id) else {
                continue;
            };
            let entity = match self.resolve(&url).await {
                Ok(entity) => entity,
                Err(ApiError::NotFound(_)) => continue,
                Err(ApiError::Metadata(MetadataError::NotFound(_))) => continue,
                Err(e) => return Err(e),
            };
            if let Some(view) = entity.charm_view() {
                charms.insert(id.clone(), view);
            }
        }
        Ok(charms)
    }

    /// Open a well-known file from an entity's archive blob.
    ///
    /// A cached locator is used when present; otherwise the central
    /// directory is scanned once and the result, hit or miss, is persisted
    /// on the entity so the next lookup short-circuits.
    pub async fn open_cached_blob_file(
        &self,
        entity: &EntityRow,
        file_id: FileId,
        predicate: impl Fn(&str) -> bool,
    ) -> ApiResult<Vec<u8>> {
        if let Some(zipf) = entity.cached_file(file_id) {
            if !zipf.is_valid() {
                return Err(ApiError::NotFound(format!(
                    "no {file_id} in {}",
                    entity.url
                )));
            }
            let data = self
                .storage
                .get_range(
                    &entity.blob_name,
                    zipf.offset,
                    zipf.offset + zipf.compressed_size,
                )
                .await?;
            return zipf
                .decode(&data)
                .map_err(|e| ApiError::Internal(format!("cannot read cached member: {e}")));
        }

        let blob = self.storage.get(&entity.blob_name).await?;
        self.directory_scans.fetch_add(1, Ordering::Relaxed);
        let zipf = zipfile::find_zip_member(Cursor::new(blob.as_ref()), predicate)
            .map_err(ApiError::from)?;

        // Persist the locator whether or not the file was found, so the
        // next lookup knows the search already happened.
        let url = entity.artifact_ref();
        self.metadata
            .update_cached_file(&url, file_id, &zipf)
            .await?;

        if !zipf.is_valid() {
            return Err(ApiError::NotFound(format!("no {file_id} in {}", entity.url)));
        }
        let start = zipf.offset as usize;
        let end = start + zipf.compressed_size as usize;
        let raw = blob
            .get(start..end)
            .ok_or_else(|| ApiError::Internal("zip member out of blob bounds".to_string()))?;
        zipf.decode(raw)
            .map_err(|e| ApiError::Internal(format!("cannot read zip member: {e}")))
    }

    /// Fire-and-forget counter increment for the given key path. The task
    /// owns its own handle on the metadata store, so it may outlive the
    /// originating request; failures are logged and never surface.
    pub fn increment_counter_async(&self, key: Vec<String>) {
        let metadata = self.metadata.clone();
        tokio::spawn(async move {
            if let Err(e) = metadata.increment_counter(&key).await {
                tracing::error!(key = ?key, error = %e, "cannot increment counter");
            }
        });
    }

    /// Fire-and-forget download counter increment for an entity id.
    pub fn increment_download_counts_async(&self, url: &ArtifactRef) {
        self.increment_counter_async(entity_stats_key(url, emporium_core::stats::ARCHIVE_DOWNLOAD));
    }

    /// Record an operational log entry against a set of refs, best-effort.
    pub async fn add_log(
        &self,
        level: LogLevel,
        kind: &str,
        message: String,
        urls: &[ArtifactRef],
    ) {
        let data = serde_json::json!({ "message": message });
        if let Err(e) = self.metadata.add_log(level, kind, &data, urls).await {
            tracing::error!(kind, error = %e, "cannot add log entry");
        }
    }
}
