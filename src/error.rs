use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::content::ValidationError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File exceeds the maximum upload size of {limit} bytes")]
    FileTooLarge { limit: u64 },

    #[error("Content type mismatch: {0}")]
    ContentTypeMismatch(#[from] ValidationError),

    #[error("Storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Storage quota exceeded: {used} of {limit} bytes used, upload needs {incoming}")]
    QuotaExceeded { used: u64, incoming: u64, limit: u64 },

    #[error("Caller does not own this file")]
    NotOwner,

    #[error("Expiry must be in the future")]
    InvalidExpiry,

    #[error("Download limit must be positive")]
    InvalidLimit,

    #[error("Share not available")]
    Unavailable,

    #[error("Too many requests")]
    RateLimited,

    /// Raised by the blob registry when the hash is already present.
    /// Recovered inside the ingestion pipeline and never returned to callers.
    #[error("Blob already registered")]
    AlreadyRegistered,
}

impl AppError {
    /// Collapse every share lookup failure into the same public answer so
    /// unauthenticated callers learn nothing about a token's lifecycle.
    pub fn into_public_share_error(self) -> Self {
        match self {
            AppError::NotFound(_) | AppError::Unavailable => AppError::Unavailable,
            other => other,
        }
    }
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn success_message(message: &str) -> ApiResponse<()> {
        ApiResponse {
            code: 0,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn error(code: i32, message: &str) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Database error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 401, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Internal error".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "IO error".to_string())
            }
            AppError::FileTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, 413, self.to_string())
            }
            AppError::ContentTypeMismatch(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, 415, self.to_string())
            }
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, 503, "Storage unavailable".to_string())
            }
            AppError::QuotaExceeded { .. } => {
                (StatusCode::INSUFFICIENT_STORAGE, 507, "Storage quota exceeded".to_string())
            }
            AppError::NotOwner => (StatusCode::FORBIDDEN, 403, self.to_string()),
            AppError::InvalidExpiry | AppError::InvalidLimit => {
                (StatusCode::BAD_REQUEST, 400, self.to_string())
            }
            AppError::Unavailable => (StatusCode::NOT_FOUND, 404, self.to_string()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, 429, self.to_string()),
            AppError::AlreadyRegistered => {
                tracing::error!("Unrecovered blob registration conflict");
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Internal error".to_string())
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
