use serde::Serialize;
use sqlx::FromRow;

/// One physical blob per distinct content hash. Immutable once written.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BlobRecord {
    pub content_hash: String,
    pub storage_key: String,
    pub storage_locator: String,
    pub size_bytes: i64,
    pub media_type: String,
    pub created_at: String,
}

/// Fields needed to register a freshly uploaded blob
#[derive(Debug, Clone)]
pub struct NewBlobRecord {
    pub content_hash: String,
    pub storage_key: String,
    pub storage_locator: String,
    pub size_bytes: i64,
    pub media_type: String,
}
