//! Browse and download handlers.

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use httpdate::fmt_http_date;
use serde::Deserialize;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::config::DOWNLOAD_BUFFER_SIZE;
use crate::error::ApiError;
use crate::listing;
use crate::storage::{Storage, StorageError};

#[derive(Deserialize)]
pub(crate) struct PathQuery {
    pub(crate) path: Option<String>,
}

/// Renders the listing of the directory at `?path=` (root when empty).
pub async fn browse_directory(
    Query(PathQuery { path }): Query<PathQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Html<String>, ApiError> {
    let target = storage
        .resolve_dir(path.as_deref().unwrap_or_default())
        .await?;
    let entries = storage.list_dir(&target).await?;
    info!(
        path = target.relative.as_str(),
        count = entries.len(),
        "list directory"
    );
    Ok(Html(
        listing::render_directory(&target.relative, &entries).into_string(),
    ))
}

/// Streams the file at `?path=` as an attachment.
pub async fn download_file(
    Query(PathQuery { path }): Query<PathQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let target = storage
        .resolve_file(path.as_deref().unwrap_or_default())
        .await?;
    let metadata = fs::metadata(&target.absolute)
        .await
        .map_err(StorageError::from)?;
    if !metadata.is_file() {
        return Err(ApiError::NotFound("not a file".into()));
    }
    let file_size = metadata.len();
    let file_name = target
        .relative
        .file_name()
        .map(str::to_string)
        .or_else(|| {
            target
                .absolute
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "download".into());
    let mime = mime_guess::from_path(&file_name).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&file_size.to_string())
            .map_err(|_| ApiError::Internal("failed to build headers".into()))?,
    );
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&file_name))
            .map_err(|_| ApiError::Internal("failed to build headers".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("failed to build headers".into()))?,
        );
    }

    let file = File::open(&target.absolute)
        .await
        .map_err(StorageError::from)?;
    info!(
        path = target.relative.as_str(),
        size = file_size,
        "download file"
    );
    let stream = ReaderStream::with_capacity(file, DOWNLOAD_BUFFER_SIZE);
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

/// Builds an attachment disposition carrying only the base name. Names that
/// are not plain printable ASCII get an underscore fallback plus an RFC 5987
/// `filename*` with the exact name.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if fallback == file_name {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            urlencoding::encode(file_name)
        )
    }
}
