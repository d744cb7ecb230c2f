use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    routes::models::{AttachmentKind, AttachmentRef},
    services::{storage::guess_mime, ServiceError},
    util::{bearer_or_query, require_bearer},
    ApiError, AppState,
};

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    /// Ready to be passed back as a query attachment.
    pub attachment: AttachmentRef,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DownloadQuery {
    /// Session token for plain links that cannot carry headers.
    pub token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/files",
    tag = "Files",
    security(("bearerAuth" = [])),
    request_body(content = String, description = "Multipart form with a `file` field", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "Missing or malformed file field", body = crate::error::ErrorResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 413, description = "File exceeds the upload limit", body = crate::error::ErrorResponse)
    )
)]
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_owned)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "upload.bin".to_string());
        let content = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?;

        let path = state
            .storage()
            .save_upload(&user, &filename, &content)
            .await
            .map_err(|e| {
                tracing::error!("Failed to store upload: {}", e);
                ApiError::from(ServiceError::from(e))
            })?;

        let mime_type = guess_mime(&filename);
        let kind = if mime_type.starts_with("image/") {
            AttachmentKind::Image
        } else {
            AttachmentKind::File
        };
        tracing::info!(user = %user.public_id, path = %path, size = content.len(), "file uploaded");

        return Ok(Json(UploadResponse {
            attachment: AttachmentRef {
                path,
                filename,
                mime_type,
                kind,
            },
        }));
    }

    Err(ApiError::bad_request("multipart body has no `file` field"))
}

#[utoipa::path(
    get,
    path = "/api/files/{path}",
    tag = "Files",
    security(("bearerAuth" = [])),
    params(
        ("path" = String, Path, description = "Storage-relative file path"),
        DownloadQuery
    ),
    responses(
        (status = 200, description = "File content", body = String, content_type = "application/octet-stream"),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse),
        (status = 403, description = "File belongs to another user", body = crate::error::ErrorResponse),
        (status = 404, description = "File not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = bearer_or_query(&headers, query.token.as_deref())?;
    let (user, _) = state.authenticate(&token).await?;

    let file = state
        .storage()
        .read(&user, &path)
        .await
        .map_err(|e| ApiError::from(ServiceError::from(e)))?;

    let content_type = HeaderValue::from_str(&file.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{}\"", file.filename))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.content,
    )
        .into_response())
}
