use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::Result;

/// Durable keyed binary storage the engine writes blobs into.
///
/// Implementations may be slow and remote; callers never hold a lock or an
/// open database transaction across these calls. Failures surface as
/// `AppError::StoreUnavailable`, or `AppError::NotFound` for a missing key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, returning a locator describing where it landed
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String>;

    /// Fetch the bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Remove `key`; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists. Only eventually consistent right after `put`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Issue a URL that retrieves `key` until `ttl` elapses
    async fn issue_timed_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
