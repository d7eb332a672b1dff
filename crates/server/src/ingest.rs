//! Archive ingest pipeline.
//!
//! An upload moves through an explicit sequence of phases; failure at any
//! phase aborts with the ordered compensation actions appropriate to the
//! phases already entered, so a failed upload never leaves a dangling blob
//! or entity row behind.

use crate::catalog::{AddParams, Catalog};
use crate::error::{ApiError, ApiResult};
use bytes::Bytes;
use emporium_core::reference::ArtifactRef;
use emporium_core::{BlobHash, bundle, charm, stats};
use emporium_metadata::models::LogLevel;
use emporium_metadata::{EntityRepo, entity_stats_key};
use emporium_storage::{BlobStore, put_checked};
use futures::Stream;
use std::io::Cursor;
use std::sync::Arc;
use uuid::Uuid;

/// Upload pipeline phases, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UploadPhase {
    Validating,
    BlobWritten,
    Parsed,
    Verified,
    EntityInserted,
    Indexed,
}

/// A single rollback action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compensation {
    RemoveEntity(ArtifactRef),
    RemoveBlob(String),
}

/// Tracks what an in-flight upload has created, for compensation on
/// failure.
pub struct IngestArtifacts {
    phase: UploadPhase,
    blob_name: Option<String>,
    entity_url: Option<ArtifactRef>,
}

impl IngestArtifacts {
    fn new() -> Self {
        Self {
            phase: UploadPhase::Validating,
            blob_name: None,
            entity_url: None,
        }
    }

    fn advance(&mut self, phase: UploadPhase) {
        debug_assert!(phase > self.phase, "upload phases only move forward");
        self.phase = phase;
    }

    /// The ordered rollback actions for the phases entered so far. The
    /// entity row goes first so no record ever points at a removed blob.
    fn compensations(&self) -> Vec<Compensation> {
        let mut actions = Vec::new();
        if self.phase >= UploadPhase::EntityInserted {
            if let Some(url) = &self.entity_url {
                actions.push(Compensation::RemoveEntity(url.clone()));
            }
        }
        if self.phase >= UploadPhase::BlobWritten {
            if let Some(name) = &self.blob_name {
                actions.push(Compensation::RemoveBlob(name.clone()));
            }
        }
        actions
    }

    /// Execute the rollback actions, best-effort. Failures are logged and
    /// recorded against the entity's refs but never propagate.
    async fn abort(&self, catalog: &Catalog, url: &ArtifactRef) {
        for action in self.compensations() {
            let result = match &action {
                Compensation::RemoveEntity(entity_url) => {
                    catalog.remove_entity(entity_url).await.map_err(|e| e.to_string())
                }
                Compensation::RemoveBlob(name) => catalog
                    .storage
                    .remove(name)
                    .await
                    .map_err(|e| e.to_string()),
            };
            if let Err(reason) = result {
                tracing::error!(action = ?action, error = %reason, "upload rollback failed");
                catalog
                    .add_log(
                        LogLevel::Error,
                        "ingest",
                        format!("rollback {action:?} failed: {reason}"),
                        std::slice::from_ref(url),
                    )
                    .await;
            }
        }
    }
}

/// POST semantics: allocate the next revision for `(user, name, series)`
/// and ingest the archive. Re-posting the latest revision's bytes is
/// idempotent and returns the existing ref without an upload.
pub async fn post_archive<S>(
    catalog: &Arc<Catalog>,
    url: &ArtifactRef,
    hash: Option<String>,
    size: Option<u64>,
    body: S,
) -> ApiResult<ArtifactRef>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let result = post_archive_inner(catalog, url, hash, size, body).await;
    record_upload_stats(catalog, url, result.is_ok());
    result
}

async fn post_archive_inner<S>(
    catalog: &Arc<Catalog>,
    url: &ArtifactRef,
    hash: Option<String>,
    size: Option<u64>,
    body: S,
) -> ApiResult<ArtifactRef>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    if url.series.is_empty() {
        return Err(ApiError::BadRequest("series not specified".to_string()));
    }
    if url.revision != -1 {
        return Err(ApiError::BadRequest(
            "revision specified, but should not be specified".to_string(),
        ));
    }
    let hash = require_hash(hash)?;
    let size = require_size(size)?;

    // When the declared hash matches the latest revision there is nothing
    // to do; the upload body is dropped unread.
    let latest = latest_revision_info(catalog, url).await?;
    if let Some((latest_url, latest_hash)) = &latest {
        if *latest_hash == hash.to_hex() {
            return Ok(latest_url.clone());
        }
    }

    let revision = latest.map(|(latest_url, _)| latest_url.revision + 1).unwrap_or(0);
    let url = url.with_revision(revision);
    add_blob_and_entity(catalog, &url, &hash, size, body).await?;
    Ok(url)
}

/// PUT semantics: ingest the archive at the caller-supplied revision.
pub async fn put_archive<S>(
    catalog: &Arc<Catalog>,
    url: &ArtifactRef,
    hash: Option<String>,
    size: Option<u64>,
    body: S,
) -> ApiResult<ArtifactRef>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let result = put_archive_inner(catalog, url, hash, size, body).await;
    record_upload_stats(catalog, url, result.is_ok());
    result
}

async fn put_archive_inner<S>(
    catalog: &Arc<Catalog>,
    url: &ArtifactRef,
    hash: Option<String>,
    size: Option<u64>,
    body: S,
) -> ApiResult<ArtifactRef>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    if url.series.is_empty() {
        return Err(ApiError::BadRequest("series not specified".to_string()));
    }
    if url.revision == -1 {
        return Err(ApiError::BadRequest("revision not specified".to_string()));
    }
    let hash = require_hash(hash)?;
    let size = require_size(size)?;

    add_blob_and_entity(catalog, url, &hash, size, body).await?;
    Ok(url.clone())
}

fn require_hash(hash: Option<String>) -> ApiResult<BlobHash> {
    let hash = hash
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ApiError::BadRequest("hash parameter not specified".to_string()))?;
    BlobHash::from_hex(&hash).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn require_size(size: Option<u64>) -> ApiResult<u64> {
    size.ok_or_else(|| ApiError::BadRequest("Content-Length not specified".to_string()))
}

/// Upload stats are recorded against the base-plus-series identity: each
/// entity revision is only ever uploaded once, so the revision carries no
/// information.
fn record_upload_stats(catalog: &Arc<Catalog>, url: &ArtifactRef, ok: bool) {
    let kind = if ok {
        stats::ARCHIVE_UPLOAD
    } else {
        stats::ARCHIVE_FAILED_UPLOAD
    };
    catalog.increment_counter_async(entity_stats_key(&url.with_revision(-1), kind));
}

/// The latest stored revision for the given `(user, name, series)` and its
/// blob hash.
async fn latest_revision_info(
    catalog: &Catalog,
    url: &ArtifactRef,
) -> ApiResult<Option<(ArtifactRef, String)>> {
    let entities = catalog.metadata.find_entities(url).await?;
    Ok(entities
        .into_iter()
        .max_by_key(|e| e.revision)
        .map(|e| (e.artifact_ref(), e.blob_hash)))
}

/// Stream the archive into the blob store, parse and verify it, insert the
/// entity record, and index it, rolling back on any failure.
async fn add_blob_and_entity<S>(
    catalog: &Arc<Catalog>,
    url: &ArtifactRef,
    hash: &BlobHash,
    size: u64,
    body: S,
) -> ApiResult<()>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let blob_name = Uuid::new_v4().simple().to_string();
    let mut artifacts = IngestArtifacts::new();

    // The store verifies the declared hash and size as the bytes arrive
    // and leaves nothing behind on mismatch or disconnect.
    put_checked(catalog.storage.as_ref(), &blob_name, body, &hash.to_hex(), size)
        .await
        .map_err(|e| {
            if e.is_content_mismatch() {
                ApiError::InvalidArchive(format!("cannot put archive blob: {e}"))
            } else {
                ApiError::Storage(e)
            }
        })?;
    artifacts.blob_name = Some(blob_name.clone());
    artifacts.advance(UploadPhase::BlobWritten);

    match add_entity(catalog, url, &blob_name, hash, size, &mut artifacts).await {
        Ok(()) => Ok(()),
        Err(e) => {
            artifacts.abort(catalog, url).await;
            Err(e)
        }
    }
}

/// Parse, verify, insert, and index the entity for an already-written blob.
async fn add_entity(
    catalog: &Arc<Catalog>,
    url: &ArtifactRef,
    blob_name: &str,
    hash: &BlobHash,
    size: u64,
    artifacts: &mut IngestArtifacts,
) -> ApiResult<()> {
    // Reopen the blob for random-access archive inspection.
    let blob = catalog.storage.get(blob_name).await?;

    let promulgated = catalog.promulgated_ref(url).await?;
    let params = AddParams {
        url: url.clone(),
        blob_name: blob_name.to_string(),
        blob_hash: *hash,
        blob_size: size,
        promulgated,
    };

    let entity = if url.is_bundle() {
        let parsed = bundle::read_bundle_archive(Cursor::new(blob.as_ref()))
            .map_err(|e| ApiError::InvalidArchive(e.to_string()))?;
        artifacts.advance(UploadPhase::Parsed);

        // Resolution drops unparseable and unknown charm ids; verification
        // reports them along with everything else it finds.
        let charms = catalog
            .bundle_charms(&parsed.data.required_charms())
            .await?;
        parsed
            .data
            .verify_with_charms(&verify_constraints, &charms)
            .map_err(|e| ApiError::InvalidArchive(e.to_json_message()))?;
        artifacts.advance(UploadPhase::Verified);

        catalog.add_bundle(&parsed, params).await?
    } else {
        let parsed = charm::read_charm_archive(Cursor::new(blob.as_ref()))
            .map_err(|e| ApiError::InvalidArchive(e.to_string()))?;
        artifacts.advance(UploadPhase::Parsed);

        charm::check_charm_is_valid(&parsed)
            .map_err(|e| ApiError::InvalidArchive(e.to_string()))?;
        artifacts.advance(UploadPhase::Verified);

        catalog.add_charm(&parsed, params).await?
    };
    artifacts.entity_url = Some(url.clone());
    artifacts.advance(UploadPhase::EntityInserted);

    catalog
        .search
        .upsert(&entity)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot index {}: {e}", entity.url)))?;
    artifacts.advance(UploadPhase::Indexed);

    Ok(())
}

fn verify_constraints(_constraints: &str) -> Result<(), String> {
    // TODO(constraints): validate against the deployment constraint grammar.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compensations_follow_phase() {
        let mut artifacts = IngestArtifacts::new();
        assert!(artifacts.compensations().is_empty());

        artifacts.blob_name = Some("blob".to_string());
        artifacts.advance(UploadPhase::BlobWritten);
        assert_eq!(
            artifacts.compensations(),
            vec![Compensation::RemoveBlob("blob".to_string())]
        );

        artifacts.advance(UploadPhase::Parsed);
        artifacts.advance(UploadPhase::Verified);
        let url = ArtifactRef::parse("trusty/wordpress-0").unwrap();
        artifacts.entity_url = Some(url.clone());
        artifacts.advance(UploadPhase::EntityInserted);

        // Entity removal is ordered before blob removal.
        assert_eq!(
            artifacts.compensations(),
            vec![
                Compensation::RemoveEntity(url),
                Compensation::RemoveBlob("blob".to_string()),
            ]
        );
    }

    #[test]
    fn require_hash_validates() {
        assert!(require_hash(None).is_err());
        assert!(require_hash(Some(String::new())).is_err());
        assert!(require_hash(Some("zz".to_string())).is_err());
        require_hash(Some("ab".repeat(48))).unwrap();
    }
}
