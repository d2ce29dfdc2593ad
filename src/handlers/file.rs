use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use futures_util::TryStreamExt;
use std::time::Duration;

use crate::content::{normalize_media_type, OCTET_STREAM};
use crate::error::{ApiResponse, AppError, Result};
use crate::models::{
    CurrentOwner, FileQuery, FileResponse, IngestRequest, QuotaResponse, RenameFileRequest,
    RetrievalUrlResponse,
};
use crate::services::{FileService, QuotaService};
use crate::AppState;

/// Media type to validate an upload against.
///
/// A generic or missing part type falls back to a guess from the file name;
/// `None` leaves detection to the content itself.
fn declared_media_type(part_type: Option<&str>, file_name: &str) -> Option<String> {
    match part_type.map(normalize_media_type) {
        Some(t) if !t.is_empty() && t != OCTET_STREAM => Some(t),
        _ => mime_guess::from_path(file_name)
            .first_raw()
            .map(str::to_string),
    }
}

/// Build a download response with both plain and RFC 5987 file names
pub(crate) fn attachment_response(file_name: &str, media_type: &str, data: Bytes) -> Result<Response> {
    let fallback_name = file_name.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(file_name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, media_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// List files, optionally within one folder
/// GET /api/v1/files?folder_id=xxx
pub async fn list_files(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Query(query): Query<FileQuery>,
) -> Result<Json<ApiResponse<Vec<FileResponse>>>> {
    let files = FileService::list_files(&state.db, &owner.id, query.folder_id.as_deref()).await?;
    Ok(Json(ApiResponse::success(
        files.into_iter().map(FileResponse::from).collect(),
    )))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = FileService::get_owned_file(&state.db, &owner.id, &id).await?;
    Ok(Json(ApiResponse::success(file.into())))
}

/// Upload a file
/// POST /api/v1/files/upload
///
/// Fields: optional `folder_id` and `size`, then `file`. The file part is
/// streamed straight into ingestion, so fields after it are ignored.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let mut folder_id: Option<String> = None;
    let mut declared_size: Option<u64> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "folder_id" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    folder_id = Some(text);
                }
            }
            "size" => {
                let text = field.text().await.unwrap_or_default();
                declared_size = text.trim().parse().ok();
            }
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;
                let declared_type = declared_media_type(field.content_type(), &file_name);

                let req = IngestRequest {
                    owner_id: owner.id.clone(),
                    file_name,
                    declared_type,
                    declared_size,
                    folder_id: folder_id.take(),
                };
                let chunks = Box::pin(field.map_err(std::io::Error::other));

                let file = FileService::ingest(
                    &state.db,
                    &state.store,
                    &state.config.storage,
                    req,
                    chunks,
                )
                .await?;
                return Ok(Json(ApiResponse::success(file.into())));
            }
            _ => {}
        }
    }

    Err(AppError::BadRequest("No file provided".to_string()))
}

/// Download a file
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (file, data) = FileService::read_file(&state.db, &state.store, &owner.id, &id).await?;
    attachment_response(&file.display_name, &file.media_type, data)
}

/// Time-bounded direct retrieval URL
/// GET /api/v1/files/:id/url
pub async fn get_retrieval_url(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<RetrievalUrlResponse>>> {
    let ttl = state.config.storage.url_ttl_seconds;
    let url = FileService::retrieval_url(
        &state.db,
        &state.store,
        &owner.id,
        &id,
        Duration::from_secs(ttl),
    )
    .await?;

    Ok(Json(ApiResponse::success(RetrievalUrlResponse {
        url,
        expires_in: ttl,
    })))
}

/// Rename a file
/// PATCH /api/v1/files/:id
pub async fn rename_file(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Path(id): Path<String>,
    Json(req): Json<RenameFileRequest>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = FileService::rename_file(&state.db, &owner.id, &id, req.name).await?;
    Ok(Json(ApiResponse::success(file.into())))
}

/// Delete a file
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    FileService::delete_file(&state.db, &state.store, &owner.id, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File deleted")))
}

/// Storage usage against the configured cap
/// GET /api/v1/quota
pub async fn get_quota(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
) -> Result<Json<ApiResponse<QuotaResponse>>> {
    let report =
        QuotaService::report(&state.db, &owner.id, state.config.storage.quota_limit()).await?;
    Ok(Json(ApiResponse::success(report)))
}
