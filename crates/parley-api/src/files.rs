use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_chat::Identity;

use crate::AppState;
use crate::error::ApiResult;

/// POST /files: Raw body, typed by the `Content-Type` header.
/// Images and PDFs only; returns `{id, url, size, mimeType}`.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    bytes: Bytes,
) -> ApiResult<impl IntoResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let uploaded = state.files.upload(&identity, &bytes, content_type).await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

/// GET /files/{file_id}: Streams the stored bytes back if the caller may read them.
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let file = state.files.open(&identity, file_id).await?;
    Ok(([(header::CONTENT_TYPE, file.mime_type)], file.bytes))
}
