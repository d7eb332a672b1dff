//! Interior content endpoints: README, icon, and bundle diagram.

use crate::diagram;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{archive_cache_control, relative_url_path};
use crate::state::AppState;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use emporium_core::reference::ArtifactRef;
use emporium_core::zipfile::{FileId, is_icon_name, is_readme_name};
use emporium_core::svg;

/// GET {id}/readme - the archive's README text.
pub async fn get_readme(state: &AppState, id: &ArtifactRef) -> ApiResult<Response> {
    let entity = state.catalog.resolve(id).await?;
    let body = state
        .catalog
        .open_cached_blob_file(&entity, FileId::Readme, is_readme_name)
        .await
        .map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::NotFound(format!("cannot get README for {id}")),
            other => other,
        })?;

    let cache = archive_cache_control(id.is_fully_qualified());
    Ok((StatusCode::OK, [(cache.0, cache.1)], Body::from(body)).into_response())
}

/// GET {id}/icon.svg - the charm icon, processed for scaling. A charm
/// without an icon gets the default icon; bundles have none.
pub async fn get_icon(state: &AppState, id: &ArtifactRef) -> ApiResult<Response> {
    if id.is_bundle() {
        return Err(ApiError::NotFound(
            "icons not supported for bundles".to_string(),
        ));
    }
    let entity = state.catalog.resolve(id).await?;
    if entity.is_bundle() {
        return Err(ApiError::NotFound(
            "icons not supported for bundles".to_string(),
        ));
    }

    let cache = archive_cache_control(id.is_fully_qualified());
    let body = match state
        .catalog
        .open_cached_blob_file(&entity, FileId::Icon, is_icon_name)
        .await
    {
        Ok(raw) => svg::process_icon(&raw)
            .map_err(|e| ApiError::Internal(format!("cannot process icon: {e}")))?,
        Err(ApiError::NotFound(_)) => svg::DEFAULT_ICON.as_bytes().to_vec(),
        Err(e) => return Err(e),
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), "image/svg+xml".to_string()),
            (cache.0.as_str(), cache.1),
        ],
        Body::from(body),
    )
        .into_response())
}

/// GET {id}/diagram.svg - an SVG visualisation of a bundle. Referenced
/// charm icons are addressed relative to the serving request URI.
pub async fn get_diagram(
    state: &AppState,
    id: &ArtifactRef,
    request_path: &str,
) -> ApiResult<Response> {
    if !id.is_bundle() {
        return Err(ApiError::NotFound(
            "diagrams not supported for charms".to_string(),
        ));
    }
    let entity = state.catalog.resolve(id).await?;
    let data = entity
        .bundle_data
        .as_ref()
        .ok_or_else(|| ApiError::Internal(format!("bundle {id} has no bundle data")))?;

    let mut url_err = None;
    let body = diagram::render(&data.0, |charm_url| {
        let abs_path = format!("/v4/{charm_url}/icon.svg");
        match relative_url_path(request_path, &abs_path) {
            Ok(rel) => rel,
            Err(e) => {
                url_err = Some(e);
                abs_path
            }
        }
    });
    if let Some(e) = url_err {
        return Err(e);
    }

    let cache = archive_cache_control(id.is_fully_qualified());
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), "image/svg+xml".to_string()),
            (cache.0.as_str(), cache.1),
        ],
        Body::from(body),
    )
        .into_response())
}
