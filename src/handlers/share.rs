use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap},
    response::Response,
    Extension, Json,
};
use std::net::SocketAddr;

use crate::error::{ApiResponse, AppError, Result};
use crate::handlers::file::attachment_response;
use crate::models::{
    ClientInfo, CreateShareRequest, CurrentOwner, DownloadEvent, PublicShareInfo, ShareListItem,
    ShareToken, UpdateShareRequest,
};
use crate::services::ShareService;
use crate::AppState;

/// Create a new share
/// POST /api/v1/shares
pub async fn create_share(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Json(req): Json<CreateShareRequest>,
) -> Result<Json<ApiResponse<ShareToken>>> {
    let share =
        ShareService::issue(&state.db, &owner.id, req, state.config.share.token_length).await?;
    Ok(Json(ApiResponse::success(share)))
}

/// List owner's shares
/// GET /api/v1/shares/my
pub async fn list_my_shares(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
) -> Result<Json<ApiResponse<Vec<ShareListItem>>>> {
    let shares = ShareService::list_shares(&state.db, &owner.id).await?;
    Ok(Json(ApiResponse::success(shares)))
}

/// Enable, disable or re-limit a share
/// PATCH /api/v1/shares/:id
pub async fn update_share(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Path(id): Path<String>,
    Json(req): Json<UpdateShareRequest>,
) -> Result<Json<ApiResponse<ShareToken>>> {
    let share = ShareService::update_share(&state.db, &owner.id, &id, req).await?;
    Ok(Json(ApiResponse::success(share)))
}

/// Delete a share
/// DELETE /api/v1/shares/:id
pub async fn delete_share(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    ShareService::delete_share(&state.db, &owner.id, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message("Share deleted")))
}

/// Download history of a share
/// GET /api/v1/shares/:id/events
pub async fn list_share_events(
    State(state): State<AppState>,
    Extension(owner): Extension<CurrentOwner>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<DownloadEvent>>>> {
    let events = ShareService::list_download_events(&state.db, &owner.id, &id).await?;
    Ok(Json(ApiResponse::success(events)))
}

/// Get public share info
/// GET /api/v1/public/share/:token
pub async fn get_public_share(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<PublicShareInfo>>> {
    let resolved = ShareService::resolve(&state.db, &token)
        .await
        .map_err(AppError::into_public_share_error)?;
    Ok(Json(ApiResponse::success(PublicShareInfo::new(
        &resolved.share,
        &resolved.file,
    ))))
}

/// Download through a share token
/// GET /api/v1/public/share/:token/download
pub async fn download_public_share(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<Response> {
    let address = addr.ip().to_string();
    if !state.rate_limiter.check(&address) {
        tracing::debug!(client = %address, "Public download rate limited");
        return Err(AppError::RateLimited);
    }

    let client = ClientInfo {
        address: Some(address),
        agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let download = ShareService::consume(&state.db, &state.store, &token, client)
        .await
        .map_err(AppError::into_public_share_error)?;

    if !download.warnings.is_empty() {
        tracing::debug!(warnings = ?download.warnings, "Share download served with bookkeeping warnings");
    }

    attachment_response(&download.file_name, &download.media_type, download.data)
}
