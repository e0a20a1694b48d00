//! Single-file multipart upload into a directory below the root.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Extension, Multipart, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use futures_util::stream::StreamExt;
use std::path::{Component, Path};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::atomic::StagedFile;
use crate::config::UPLOAD_FIELD_NAME;
use crate::error::ApiError;
use crate::files::PathQuery;
use crate::listing::browse_href;
use crate::storage::{ResolvedPath, STAGING_PREFIX, Storage};

/// Stores the `file` field of a multipart body in the directory at
/// `?path=`, then redirects back to that directory's listing.
pub async fn upload_file(
    Query(PathQuery { path }): Query<PathQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let target = storage
        .resolve_dir(path.as_deref().unwrap_or_default())
        .await?;
    if let Ok(metadata) = fs::metadata(&target.absolute).await
        && !metadata.is_dir()
    {
        return Err(ApiError::BadRequest("upload target is not a directory".into()));
    }

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }
        let file_name = field
            .file_name()
            .and_then(sanitize_file_name)
            .ok_or_else(|| ApiError::BadRequest("file name is required".into()))?;
        let size = store_field(&target, &file_name, field).await?;
        info!(
            path = target.relative.as_str(),
            name = file_name,
            size,
            "upload complete"
        );
        return Ok(Redirect::to(&browse_href(&target.relative)).into_response());
    }

    Err(ApiError::BadRequest("file field is required".into()))
}

async fn store_field(
    target: &ResolvedPath,
    file_name: &str,
    mut field: Field<'_>,
) -> Result<u64, ApiError> {
    fs::create_dir_all(&target.absolute)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let destination = target.absolute.join(file_name);
    if destination.parent() != Some(target.absolute.as_path()) {
        return Err(ApiError::BadRequest("invalid file name".into()));
    }
    if let Ok(metadata) = fs::symlink_metadata(&destination).await
        && !metadata.is_file()
    {
        return Err(ApiError::BadRequest(
            "destination exists and is not a file".into(),
        ));
    }

    let mut staged = StagedFile::create(&destination)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    while let Some(chunk) = field.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(name = file_name, error = %err, "upload stream failed");
                staged.discard().await;
                return Err(multipart_error(err));
            }
        };
        if let Err(err) = staged.write_chunk(&chunk).await {
            warn!(name = file_name, error = %err, "upload write failed");
            staged.discard().await;
            return Err(ApiError::Internal(err.to_string()));
        }
    }

    if staged.written() == 0 {
        staged.discard().await;
        return Err(ApiError::BadRequest("uploaded file is empty".into()));
    }
    staged
        .commit()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// Reduces a client-supplied file name to its base name. Both slash kinds
/// count as separators; `.`, `..`, drive prefixes and staging names are
/// refused.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let base = normalized.rsplit('/').next()?.trim();
    if base.is_empty() || base.starts_with(STAGING_PREFIX) || base.contains('\0') {
        return None;
    }
    let mut components = Path::new(base).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(base.to_string()),
        _ => None,
    }
}
