//! Request handlers.
//!
//! Artifact ids span a variable number of path segments
//! (`[~user/][series/]name[-rev]`), which the router cannot pattern-match
//! directly, so all artifact endpoints go through a fallback handler that
//! splits the path into an id and a known endpoint name.

pub mod archive;
pub mod content;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use emporium_core::reference::ArtifactRef;
use emporium_metadata::MetadataStore;
use emporium_storage::BlobStore;
use serde_json::json;

/// Response header carrying the blob's hex SHA-384.
pub const CONTENT_HASH_HEADER: &str = "ContentHash";
/// Response header carrying the fully qualified entity id.
pub const ENTITY_ID_HEADER: &str = "EntityId";

/// Cache lifetime for responses to fully qualified ids (365 days).
const CACHE_VERSIONED_MAX_AGE: u64 = 31_536_000;
/// Cache lifetime for responses to partial ids (5 minutes).
const CACHE_NON_VERSIONED_MAX_AGE: u64 = 300;

/// The endpoint addressed beneath an artifact id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Archive,
    ArchiveFile(String),
    Readme,
    Icon,
    Diagram,
}

/// Split a request path (relative to the version prefix) into the artifact
/// id and the endpoint it addresses.
pub fn split_path(path: &str) -> ApiResult<(ArtifactRef, Endpoint)> {
    let path = path.trim_matches('/');
    let segments: Vec<&str> = path.split('/').collect();

    for (i, segment) in segments.iter().enumerate() {
        if i == 0 {
            // The id has at least one segment.
            continue;
        }
        let endpoint = match *segment {
            "archive" => {
                let rest = segments[i + 1..].join("/");
                if rest.is_empty() {
                    Endpoint::Archive
                } else {
                    Endpoint::ArchiveFile(rest)
                }
            }
            "readme" if i == segments.len() - 1 => Endpoint::Readme,
            "icon.svg" if i == segments.len() - 1 => Endpoint::Icon,
            "diagram.svg" if i == segments.len() - 1 => Endpoint::Diagram,
            _ => continue,
        };
        let id = ArtifactRef::parse(&segments[..i].join("/"))
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        return Ok((id, endpoint));
    }
    Err(ApiError::NotFound(format!("no handler for {path:?}")))
}

/// GET /health - liveness probe.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.catalog.metadata.health_check().await?;
    state.catalog.storage.health_check().await?;
    Ok(Json(json!({"status": "ok"})))
}

/// Fallback handler dispatching artifact endpoints under the version
/// prefix.
pub async fn artifact_dispatch(State(state): State<AppState>, req: Request) -> Response {
    let Some(rest) = req.uri().path().strip_prefix("/v4/") else {
        return ApiError::NotFound(format!("no handler for {:?}", req.uri().path()))
            .into_response();
    };
    let (id, endpoint) = match split_path(rest) {
        Ok(parts) => parts,
        Err(e) => return e.into_response(),
    };

    let result = match (req.method().clone(), endpoint) {
        (Method::GET, Endpoint::Archive) => archive::get_archive(&state, &id, req).await,
        (Method::POST, Endpoint::Archive) => archive::post_archive(&state, &id, req).await,
        (Method::PUT, Endpoint::Archive) => archive::put_archive(&state, &id, req).await,
        (Method::DELETE, Endpoint::Archive) => archive::delete_archive(&state, &id).await,
        (Method::GET, Endpoint::ArchiveFile(file)) => {
            archive::get_archive_file(&state, &id, &file).await
        }
        (Method::GET, Endpoint::Readme) => content::get_readme(&state, &id).await,
        (Method::GET, Endpoint::Icon) => content::get_icon(&state, &id).await,
        (Method::GET, Endpoint::Diagram) => {
            let request_path = req.uri().path().to_string();
            content::get_diagram(&state, &id, &request_path).await
        }
        _ => {
            return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
        }
    };
    match result {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// The archive cache-control header value: long-lived for fully qualified
/// ids, short for partial ones.
pub fn archive_cache_control(id_fully_specified: bool) -> (header::HeaderName, String) {
    let age = if id_fully_specified {
        CACHE_VERSIONED_MAX_AGE
    } else {
        CACHE_NON_VERSIONED_MAX_AGE
    };
    (header::CACHE_CONTROL, format!("public, max-age={age}"))
}

/// Compute a relative URL path from `base` to `target`, both absolute.
pub fn relative_url_path(base: &str, target: &str) -> ApiResult<String> {
    if !base.starts_with('/') || !target.starts_with('/') {
        return Err(ApiError::Internal(format!(
            "cannot make relative URL from {base:?} and {target:?}"
        )));
    }
    // The last segment of the base is the file part; relativity is against
    // its directory.
    let base_dirs: Vec<&str> = {
        let mut segments: Vec<&str> = base.split('/').skip(1).collect();
        segments.pop();
        segments
    };
    let target_segments: Vec<&str> = target.split('/').skip(1).collect();

    let common = base_dirs
        .iter()
        .zip(target_segments.iter())
        .take_while(|(a, b)| a == b)
        .count();
    // Never treat the target's final (file) segment as common.
    let common = common.min(target_segments.len().saturating_sub(1));

    let mut parts: Vec<String> = Vec::new();
    for _ in common..base_dirs.len() {
        parts.push("..".to_string());
    }
    for segment in &target_segments[common..] {
        parts.push((*segment).to_string());
    }
    if parts.is_empty() {
        parts.push(".".to_string());
    }
    Ok(parts.join("/"))
}
