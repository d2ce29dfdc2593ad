use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::models::CurrentOwner;
use crate::AppState;

/// Owner identification middleware.
///
/// Identity is established upstream; this reads the owner id from the
/// configured header and rejects requests without one.
pub async fn owner_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header_name = state.config.server.owner_header.as_str();
    let owner_id = request
        .headers()
        .get(header_name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", header_name)))?
        .to_string();

    request.extensions_mut().insert(CurrentOwner { id: owner_id });

    Ok(next.run(request).await)
}
