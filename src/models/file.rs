use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Owner-scoped file entry. Several may point at the same blob.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LogicalFile {
    pub id: String,
    pub owner_id: String,
    pub folder_id: Option<String>,
    pub display_name: String,
    pub stored_name: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub is_duplicate_of_existing: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// File response returned to owners. Storage keys and hashes stay internal.
#[derive(Debug, Clone, Serialize)]
pub struct FileResponse {
    pub id: String,
    pub folder_id: Option<String>,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub is_duplicate: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<LogicalFile> for FileResponse {
    fn from(file: LogicalFile) -> Self {
        Self {
            id: file.id,
            folder_id: file.folder_id,
            name: file.display_name,
            mime_type: file.media_type,
            size: file.size_bytes,
            is_duplicate: file.is_duplicate_of_existing,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

/// Everything the ingestion pipeline needs besides the bytes
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub owner_id: String,
    pub file_name: String,
    /// Declared media type; detected from the bytes when absent
    pub declared_type: Option<String>,
    /// Transport-reported size, checked before reading
    pub declared_size: Option<u64>,
    pub folder_id: Option<String>,
}

/// Rename file request
#[derive(Debug, Deserialize)]
pub struct RenameFileRequest {
    pub name: String,
}

/// File query parameters
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub folder_id: Option<String>,
}

/// Time-bounded direct retrieval link
#[derive(Debug, Serialize)]
pub struct RetrievalUrlResponse {
    pub url: String,
    pub expires_in: u64,
}

/// Per-owner storage accounting
#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub used: u64,
    /// `None` when no cap is configured
    pub limit: Option<u64>,
}
