//! Archive endpoints: whole-archive GET/POST/PUT/DELETE and interior file
//! serving.

use crate::error::{ApiError, ApiResult};
use crate::handlers::{CONTENT_HASH_HEADER, ENTITY_ID_HEADER, archive_cache_control};
use crate::ingest;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use emporium_core::reference::ArtifactRef;
use emporium_core::stats;
use emporium_core::zipfile::normalize_path;
use emporium_metadata::entity_stats_key;
use emporium_storage::BlobStore;
use futures::TryStreamExt;
use serde_json::json;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Query parameter lookup over a request URI.
fn query_param(req: &Request, name: &str) -> Option<String> {
    let query = req.uri().query()?;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == name {
            return Some(value.to_string());
        }
    }
    None
}

fn content_length(req: &Request) -> Option<u64> {
    req.headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// The upload body as an io-error stream for the blob store.
fn body_stream(
    req: Request,
) -> impl futures::Stream<Item = std::io::Result<bytes::Bytes>> + Unpin {
    req.into_body()
        .into_data_stream()
        .map_err(std::io::Error::other)
}

/// GET {id}/archive - stream the whole archive blob.
///
/// Supports single byte ranges. Unless `stats=0`, the download counter for
/// the resolved id is incremented in the background.
pub async fn get_archive(state: &AppState, id: &ArtifactRef, req: Request) -> ApiResult<Response> {
    let entity = state.catalog.resolve(id).await?;
    let resolved = entity.artifact_ref();

    if query_param(&req, "stats").as_deref() != Some("0") {
        state.catalog.increment_download_counts_async(&resolved);
    }

    let (stream, size) = state.catalog.open_blob(&entity).await?;
    let cache = archive_cache_control(id.is_fully_qualified());

    // An unsupported or unsatisfiable Range header is ignored and the whole
    // blob is served.
    let range = req
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_byte_range(v, size));
    if let Some((start, end)) = range {
        let body = state
            .catalog
            .storage
            .get_range(&entity.blob_name, start, end + 1)
            .await?;
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            [
                (
                    header::CONTENT_RANGE.as_str(),
                    format!("bytes {start}-{end}/{size}"),
                ),
                (CONTENT_HASH_HEADER, entity.blob_hash.clone()),
                (ENTITY_ID_HEADER, entity.url.clone()),
                (cache.0.as_str(), cache.1),
            ],
            Body::from(body),
        )
            .into_response());
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_LENGTH.as_str(), size.to_string()),
            (CONTENT_HASH_HEADER, entity.blob_hash.clone()),
            (ENTITY_ID_HEADER, entity.url.clone()),
            (cache.0.as_str(), cache.1),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Parse a single-range `bytes=` header against a blob of `size` bytes.
/// Returns None when the range cannot be satisfied; inclusive bounds
/// otherwise.
fn parse_byte_range(value: &str, size: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        // Multiple ranges are not supported; serve the whole blob instead.
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    if start.is_empty() {
        // Suffix form: the last N bytes.
        let n: u64 = end.parse().ok()?;
        if n == 0 || size == 0 {
            return None;
        }
        let n = n.min(size);
        return Some((size - n, size - 1));
    }
    let start: u64 = start.parse().ok()?;
    if start >= size {
        return None;
    }
    let end: u64 = if end.is_empty() {
        size - 1
    } else {
        end.parse::<u64>().ok()?.min(size - 1)
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

/// POST {id}/archive?hash=sha384hex - upload a new revision.
pub async fn post_archive(state: &AppState, id: &ArtifactRef, req: Request) -> ApiResult<Response> {
    let hash = query_param(&req, "hash");
    let size = content_length(&req);
    check_upload_size(state, size)?;
    let uploaded = ingest::post_archive(
        &state.catalog,
        id,
        hash,
        size,
        body_stream(req),
    )
    .await?;
    Ok(axum::Json(json!({"Id": uploaded.to_string()})).into_response())
}

/// PUT {id}/archive?hash=sha384hex - upload at a caller-supplied revision.
pub async fn put_archive(state: &AppState, id: &ArtifactRef, req: Request) -> ApiResult<Response> {
    let hash = query_param(&req, "hash");
    let size = content_length(&req);
    check_upload_size(state, size)?;
    let uploaded = ingest::put_archive(
        &state.catalog,
        id,
        hash,
        size,
        body_stream(req),
    )
    .await?;
    Ok(axum::Json(json!({"Id": uploaded.to_string()})).into_response())
}

fn check_upload_size(state: &AppState, size: Option<u64>) -> ApiResult<()> {
    if let Some(size) = size {
        let max = state.config.server.max_upload_bytes;
        if size > max {
            return Err(ApiError::BadRequest(format!(
                "archive size {size} exceeds maximum {max}"
            )));
        }
    }
    Ok(())
}

/// DELETE {id}/archive - remove the entity and its blob.
pub async fn delete_archive(state: &AppState, id: &ArtifactRef) -> ApiResult<Response> {
    let entity = state.catalog.resolve(id).await?;
    let resolved = entity.artifact_ref();

    state.catalog.remove_entity(&resolved).await?;
    // A blob that is already gone is logged, not fatal; the entity row is
    // the authoritative record and it has been removed.
    if let Err(e) = state.catalog.storage.remove(&entity.blob_name).await {
        tracing::warn!(blob = %entity.blob_name, error = %e, "cannot remove blob");
    }
    state
        .catalog
        .increment_counter_async(entity_stats_key(&resolved, stats::ARCHIVE_DELETE));
    Ok(StatusCode::OK.into_response())
}

/// GET {id}/archive/<path> - stream one interior file from the archive.
pub async fn get_archive_file(
    state: &AppState,
    id: &ArtifactRef,
    file_path: &str,
) -> ApiResult<Response> {
    let entity = state.catalog.resolve(id).await?;
    let blob = state.catalog.storage.get(&entity.blob_name).await?;

    let wanted = normalize_path(file_path);
    let mut archive = ZipArchive::new(Cursor::new(blob.as_ref()))
        .map_err(|e| ApiError::Internal(format!("cannot read archive data for {id}: {e}")))?;

    let index = (0..archive.len()).find(|&i| {
        archive
            .name_for_index(i)
            .is_some_and(|name| normalize_path(name) == wanted)
    });
    let Some(index) = index else {
        return Err(ApiError::NotFound(format!(
            "file {wanted:?} not found in the archive"
        )));
    };

    let mut entry = archive
        .by_index(index)
        .map_err(|e| ApiError::Internal(format!("unable to read file {wanted:?}: {e}")))?;
    if entry.is_dir() {
        return Err(ApiError::Forbidden("directory listing not allowed".to_string()));
    }
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut data)
        .map_err(|e| ApiError::Internal(format!("unable to read file {wanted:?}: {e}")))?;

    let cache = archive_cache_control(id.is_fully_qualified());
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, data.len())
        .header(cache.0, cache.1);
    if let Some(mime) = mime_guess::from_path(&wanted).first() {
        response = response.header(header::CONTENT_TYPE, mime.as_ref());
    }
    response
        .body(Body::from(data))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
