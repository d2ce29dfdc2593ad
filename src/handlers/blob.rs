use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::services::{BlobRegistry, FileService};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// Serve a blob through a signed, time-bounded URL
/// GET /api/v1/blobs/*key?expires=..&signature=..
pub async fn get_signed_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response> {
    if !state.signer.verify(&key, query.expires, &query.signature) {
        return Err(AppError::NotFound("Link expired or invalid".to_string()));
    }

    let blob = {
        let mut conn = state.db.pool().acquire().await?;
        BlobRegistry::find_by_storage_key(&mut conn, &key)
            .await?
            .ok_or_else(|| AppError::NotFound("Link expired or invalid".to_string()))?
    };
    let data = FileService::fetch_blob(&state.store, &blob).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, blob.media_type)
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
