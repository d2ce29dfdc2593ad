use bytes::{Bytes, BytesMut};
use futures_util::{Stream, TryStreamExt};
use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::content::{self, ValidationError};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{now_timestamp, BlobRecord, IngestRequest, LogicalFile, NewBlobRecord};
use crate::services::{BlobRegistry, QuotaService};
use crate::storage::BlobStore;

/// Lookups retried when a matched blob is released before the new file links to it
const MAX_INGEST_ATTEMPTS: usize = 3;

/// Deletes an uploaded blob unless disarmed.
///
/// Covers both failure after upload and the caller abandoning the request
/// while the upload is in flight: dropping an armed guard schedules the
/// delete on the runtime. Once the bytes are stored the guard moves into a
/// detached link task, so a dropped caller can no longer drop it mid-commit.
struct UploadGuard {
    store: Arc<dyn BlobStore>,
    key: Option<String>,
}

impl UploadGuard {
    fn new(store: Arc<dyn BlobStore>, key: String) -> Self {
        Self {
            store,
            key: Some(key),
        }
    }

    /// The upload is now referenced by a committed blob record
    fn disarm(mut self) {
        self.key = None;
    }

    /// Delete the upload now
    async fn release(mut self) {
        if let Some(key) = self.key.take() {
            Self::remove(self.store.as_ref(), &key).await;
        }
    }

    async fn remove(store: &dyn BlobStore, key: &str) {
        match store.delete(key).await {
            Ok(()) => tracing::debug!(storage_key = %key, "Removed uncommitted upload"),
            Err(e) => tracing::warn!(
                storage_key = %key,
                "Failed to remove uncommitted upload, blob is orphaned: {}",
                e
            ),
        }
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let store = self.store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(storage_key = %key, "Ingestion abandoned after upload, scheduling cleanup");
                handle.spawn(async move {
                    Self::remove(store.as_ref(), &key).await;
                });
            }
            Err(_) => {
                tracing::warn!(storage_key = %key, "Ingestion abandoned outside a runtime, blob is orphaned");
            }
        }
    }
}

/// Collect the upload's chunks, failing as soon as they exceed `limit` bytes
async fn read_bounded<S>(mut chunks: S, limit: u64) -> Result<Bytes>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut buf = BytesMut::new();
    while let Some(chunk) = chunks
        .try_next()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(AppError::FileTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Logical file registry and deduplicating ingestion
pub struct FileService;

impl FileService {
    /// Ingest an upload.
    ///
    /// Size and content type are checked before anything is written. Bytes
    /// already stored under the same hash are linked without a transfer;
    /// new bytes are uploaded and registered, with the upload removed again
    /// if the file cannot be recorded.
    pub async fn ingest<S>(
        db: &Database,
        store: &Arc<dyn BlobStore>,
        limits: &StorageConfig,
        req: IngestRequest,
        chunks: S,
    ) -> Result<LogicalFile>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin + Send,
    {
        Self::validate_name(&req.file_name)?;

        let max = limits.max_file_size;
        if let Some(declared) = req.declared_size {
            if declared > max {
                return Err(AppError::FileTooLarge { limit: max });
            }
        }

        let data = read_bounded(chunks, max).await?;

        let declared = req
            .declared_type
            .as_deref()
            .map(content::normalize_media_type)
            .filter(|t| !t.is_empty());
        let media_type = match declared {
            Some(declared) => {
                content::validate(&data, &declared)?;
                declared
            }
            None => {
                if data.is_empty() {
                    return Err(ValidationError::EmptyContent.into());
                }
                content::detect_media_type(&data).to_string()
            }
        };

        let hash = content::content_hash(&data);

        for attempt in 1..=MAX_INGEST_ATTEMPTS {
            let existing = {
                let mut conn = db.pool().acquire().await?;
                BlobRegistry::find_by_hash(&mut conn, &hash).await?
            };

            let Some(record) = existing else {
                return Self::ingest_new_blob(db, store, limits, &req, data, hash, media_type).await;
            };

            let mut conn = db.pool().acquire().await?;
            match Self::insert_logical_file(&mut conn, &req, &media_type, &record, true).await {
                Ok(file) => {
                    tracing::info!(file_id = %file.id, owner_id = %file.owner_id, "Linked upload to existing blob");
                    return Ok(file);
                }
                Err(AppError::Database(sqlx::Error::Database(e))) if e.is_foreign_key_violation() => {
                    tracing::debug!(attempt, "Matched blob was released concurrently, retrying lookup");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Internal(
            "Upload could not be linked after repeated concurrent deletes".to_string(),
        ))
    }

    /// Miss path: quota, upload, then register and link in one transaction
    async fn ingest_new_blob(
        db: &Database,
        store: &Arc<dyn BlobStore>,
        limits: &StorageConfig,
        req: &IngestRequest,
        data: Bytes,
        hash: String,
        media_type: String,
    ) -> Result<LogicalFile> {
        let size = data.len() as u64;
        QuotaService::check_quota(db, &req.owner_id, size, limits.quota_limit()).await?;

        let storage_key = Self::generate_storage_key();
        let guard = UploadGuard::new(store.clone(), storage_key.clone());
        let storage_locator = match store.put(&storage_key, data, &media_type).await {
            Ok(locator) => locator,
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        };

        let new = NewBlobRecord {
            content_hash: hash,
            storage_key,
            storage_locator,
            size_bytes: size as i64,
            media_type: media_type.clone(),
        };

        // A commit sent to SQLite completes even if its future is dropped,
        // so the guard must only ever observe the transaction's real outcome
        let db = db.clone();
        let req = req.clone();
        let link = tokio::spawn(async move {
            match Self::link_new_blob(&db, &req, &media_type, &new).await {
                Ok((file, true)) => {
                    guard.disarm();
                    tracing::info!(file_id = %file.id, owner_id = %file.owner_id, size, "Stored new blob");
                    Ok(file)
                }
                Ok((file, false)) => {
                    // Lost the registration race; the winner's blob is used instead
                    guard.release().await;
                    tracing::info!(file_id = %file.id, owner_id = %file.owner_id, "Linked upload to concurrently stored blob");
                    Ok(file)
                }
                Err(e) => {
                    tracing::warn!("Upload could not be recorded, removing stored bytes: {}", e);
                    guard.release().await;
                    Err(e)
                }
            }
        });

        link.await
            .map_err(|e| AppError::Internal(format!("Upload link task failed: {}", e)))?
    }

    async fn link_new_blob(
        db: &Database,
        req: &IngestRequest,
        media_type: &str,
        new: &NewBlobRecord,
    ) -> Result<(LogicalFile, bool)> {
        let mut tx = db.pool().begin().await?;
        let (record, created) = BlobRegistry::insert_or_fetch(&mut tx, new).await?;
        let file = Self::insert_logical_file(&mut tx, req, media_type, &record, !created).await?;
        tx.commit().await?;
        Ok((file, created))
    }

    async fn insert_logical_file(
        conn: &mut SqliteConnection,
        req: &IngestRequest,
        media_type: &str,
        record: &BlobRecord,
        is_duplicate: bool,
    ) -> Result<LogicalFile> {
        let now = now_timestamp();
        let file = LogicalFile {
            id: Uuid::new_v4().to_string(),
            owner_id: req.owner_id.clone(),
            folder_id: req.folder_id.clone(),
            display_name: req.file_name.clone(),
            stored_name: record.storage_key.clone(),
            media_type: media_type.to_string(),
            size_bytes: record.size_bytes,
            content_hash: record.content_hash.clone(),
            is_duplicate_of_existing: is_duplicate,
            created_at: now.clone(),
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO logical_files (id, owner_id, folder_id, display_name, stored_name, media_type, size_bytes, content_hash, is_duplicate_of_existing, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.owner_id)
        .bind(&file.folder_id)
        .bind(&file.display_name)
        .bind(&file.stored_name)
        .bind(&file.media_type)
        .bind(file.size_bytes)
        .bind(&file.content_hash)
        .bind(file.is_duplicate_of_existing)
        .bind(&file.created_at)
        .bind(&file.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(file)
    }

    /// Fresh storage key, sharded by its first two hex digits
    fn generate_storage_key() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}/{}", &id[..2], id)
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() || name.len() > 255 || name.contains('/') || name.contains('\\') {
            return Err(AppError::BadRequest("Invalid file name".to_string()));
        }
        Ok(())
    }

    /// Get a file by ID
    pub async fn get_file(db: &Database, file_id: &str) -> Result<LogicalFile> {
        let file: LogicalFile = sqlx::query_as("SELECT * FROM logical_files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        Ok(file)
    }

    /// Get a file the caller owns
    pub async fn get_owned_file(db: &Database, owner_id: &str, file_id: &str) -> Result<LogicalFile> {
        let file = Self::get_file(db, file_id).await?;
        if file.owner_id != owner_id {
            return Err(AppError::NotOwner);
        }
        Ok(file)
    }

    /// List an owner's files, optionally limited to one folder
    pub async fn list_files(
        db: &Database,
        owner_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Vec<LogicalFile>> {
        let files = match folder_id {
            Some(folder_id) => {
                sqlx::query_as(
                    "SELECT * FROM logical_files WHERE owner_id = ? AND folder_id = ? ORDER BY display_name ASC",
                )
                .bind(owner_id)
                .bind(folder_id)
                .fetch_all(db.pool())
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM logical_files WHERE owner_id = ? ORDER BY display_name ASC")
                    .bind(owner_id)
                    .fetch_all(db.pool())
                    .await?
            }
        };
        Ok(files)
    }

    /// Rename a file
    pub async fn rename_file(
        db: &Database,
        owner_id: &str,
        file_id: &str,
        new_name: String,
    ) -> Result<LogicalFile> {
        let file = Self::get_owned_file(db, owner_id, file_id).await?;
        Self::validate_name(&new_name)?;

        let now = now_timestamp();
        sqlx::query("UPDATE logical_files SET display_name = ?, updated_at = ? WHERE id = ?")
            .bind(&new_name)
            .bind(&now)
            .bind(&file.id)
            .execute(db.pool())
            .await?;

        Self::get_file(db, file_id).await
    }

    /// Delete a logical file.
    ///
    /// The blob row and bytes go only with the last reference; share tokens
    /// pointing at this file are removed with it.
    pub async fn delete_file(
        db: &Database,
        store: &Arc<dyn BlobStore>,
        owner_id: &str,
        file_id: &str,
    ) -> Result<()> {
        let file = Self::get_owned_file(db, owner_id, file_id).await?;

        let mut tx = db.pool().begin().await?;
        sqlx::query("DELETE FROM logical_files WHERE id = ?")
            .bind(&file.id)
            .execute(&mut *tx)
            .await?;
        let released = BlobRegistry::unregister(&mut tx, &file.content_hash).await?;
        tx.commit().await?;

        match released {
            Some(record) => match store.delete(&record.storage_key).await {
                Ok(()) => tracing::info!(file_id = %file.id, "Deleted file and released its blob"),
                Err(e) => tracing::warn!(
                    storage_key = %record.storage_key,
                    "Blob record removed but bytes could not be deleted, blob is orphaned: {}",
                    e
                ),
            },
            None => tracing::info!(file_id = %file.id, "Deleted file, blob still referenced"),
        }

        Ok(())
    }

    /// Blob record backing a file
    pub async fn get_file_blob(db: &Database, file: &LogicalFile) -> Result<BlobRecord> {
        let mut conn = db.pool().acquire().await?;
        BlobRegistry::find_by_hash(&mut conn, &file.content_hash)
            .await?
            .ok_or_else(|| AppError::Internal("File references a missing blob".to_string()))
    }

    /// Fetch a blob's bytes; a key missing from the store is a storage fault
    pub async fn fetch_blob(store: &Arc<dyn BlobStore>, blob: &BlobRecord) -> Result<Bytes> {
        store.get(&blob.storage_key).await.map_err(|e| match e {
            AppError::NotFound(_) => AppError::StoreUnavailable(format!(
                "Blob {} missing from {} store",
                blob.storage_key,
                store.storage_type()
            )),
            other => other,
        })
    }

    /// Owner download: the file and its bytes
    pub async fn read_file(
        db: &Database,
        store: &Arc<dyn BlobStore>,
        owner_id: &str,
        file_id: &str,
    ) -> Result<(LogicalFile, Bytes)> {
        let file = Self::get_owned_file(db, owner_id, file_id).await?;
        let blob = Self::get_file_blob(db, &file).await?;
        let data = Self::fetch_blob(store, &blob).await?;
        Ok((file, data))
    }

    /// Time-bounded direct retrieval URL for an owned file
    pub async fn retrieval_url(
        db: &Database,
        store: &Arc<dyn BlobStore>,
        owner_id: &str,
        file_id: &str,
        ttl: Duration,
    ) -> Result<String> {
        let file = Self::get_owned_file(db, owner_id, file_id).await?;
        let blob = Self::get_file_blob(db, &file).await?;
        store.issue_timed_url(&blob.storage_key, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{text_request, TestEnv};

    const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00\x01";

    #[tokio::test]
    async fn test_identical_uploads_share_one_blob() {
        let env = TestEnv::new().await;

        let first = env.ingest_text("alice", "a.txt", "same bytes").await.unwrap();
        let second = env.ingest_text("alice", "b.txt", "same bytes").await.unwrap();

        assert!(!first.is_duplicate_of_existing);
        assert!(second.is_duplicate_of_existing);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.stored_name, second.stored_name);
        assert_eq!(env.store.put_count(), 1);
        assert_eq!(env.blob_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_across_owners() {
        let env = TestEnv::new().await;
        env.ingest_text("alice", "a.txt", "shared").await.unwrap();
        let bobs = env.ingest_text("bob", "b.txt", "shared").await.unwrap();

        assert!(bobs.is_duplicate_of_existing);
        assert_eq!(bobs.owner_id, "bob");
        assert_eq!(env.store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_declared_size_over_limit() {
        let env = TestEnv::with_limits(10, 0).await;
        let mut req = text_request("alice", "a.txt");
        req.declared_size = Some(11);

        let err = env.ingest(req, b"short").await.unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge { limit: 10 }));
        assert_eq!(env.store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_actual_size_rechecked() {
        let env = TestEnv::with_limits(10, 0).await;
        let mut req = text_request("alice", "a.txt");
        req.declared_size = Some(3);

        let err = env.ingest(req, b"much longer than ten").await.unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge { limit: 10 }));
        assert_eq!(env.blob_count().await, 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_aborts_before_store() {
        let env = TestEnv::new().await;
        let req = IngestRequest {
            declared_type: Some("image/jpeg".to_string()),
            ..text_request("alice", "photo.jpg")
        };

        let err = env.ingest(req, b"MZ\x90\x00 not a jpeg").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::ContentTypeMismatch(ValidationError::TypeMismatch { .. })
        ));
        assert_eq!(env.store.put_count(), 0);
        assert_eq!(env.blob_count().await, 0);
    }

    #[tokio::test]
    async fn test_valid_jpeg_accepted() {
        let env = TestEnv::new().await;
        let req = IngestRequest {
            declared_type: Some("image/jpeg".to_string()),
            ..text_request("alice", "photo.jpg")
        };
        let file = env.ingest(req, JPEG).await.unwrap();
        assert_eq!(file.media_type, "image/jpeg");
        assert_eq!(file.size_bytes, JPEG.len() as i64);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let env = TestEnv::new().await;
        let err = env.ingest(text_request("alice", "a.txt"), b"").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::ContentTypeMismatch(ValidationError::EmptyContent)
        ));

        let req = IngestRequest {
            declared_type: None,
            ..text_request("alice", "a.bin")
        };
        assert!(env.ingest(req, b"").await.is_err());
    }

    #[tokio::test]
    async fn test_type_detected_when_undeclared() {
        let env = TestEnv::new().await;
        let req = IngestRequest {
            declared_type: None,
            ..text_request("alice", "photo")
        };
        let file = env.ingest(req, JPEG).await.unwrap();
        assert_eq!(file.media_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let env = TestEnv::new().await;
        for name in ["", "a/b.txt", "..\\x"] {
            let err = env.ingest(text_request("alice", name), b"x").await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
    }

    #[tokio::test]
    async fn test_quota_applies_to_new_bytes_only() {
        let env = TestEnv::with_limits(1024, 10).await;
        env.ingest_text("alice", "a.txt", "12345678").await.unwrap();

        let err = env.ingest_text("alice", "b.txt", "abcdef").await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { .. }));
        assert_eq!(env.store.put_count(), 1);

        // A duplicate adds no unique bytes, so it still fits
        let copy = env.ingest_text("alice", "copy.txt", "12345678").await.unwrap();
        assert!(copy.is_duplicate_of_existing);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let env = TestEnv::new().await;
        env.store.fail_puts(true);

        let err = env.ingest_text("alice", "a.txt", "data").await.unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert_eq!(env.blob_count().await, 0);
        assert_eq!(env.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_link_removes_upload() {
        let env = TestEnv::new().await;
        // Make every logical file insert fail after the upload has happened
        sqlx::query(
            r#"
            CREATE TRIGGER reject_files BEFORE INSERT ON logical_files
            BEGIN SELECT RAISE(ABORT, 'rejected'); END
            "#,
        )
        .execute(env.db.pool())
        .await
        .unwrap();

        let err = env.ingest_text("alice", "a.txt", "data").await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(env.store.put_count(), 1);
        assert_eq!(env.store.delete_count(), 1);
        assert_eq!(env.store.stored_keys(), 0);
        assert_eq!(env.blob_count().await, 0);
    }

    #[tokio::test]
    async fn test_read_error_leaves_nothing_behind() {
        let env = TestEnv::new().await;
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"first half ")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
            Ok(Bytes::from_static(b"never read")),
        ]);

        let err = FileService::ingest(
            &env.db,
            &env.store_handle(),
            &env.config,
            text_request("alice", "a.txt"),
            chunks,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(env.store.put_count(), 0);
        assert_eq!(env.blob_count().await, 0);
        assert_eq!(env.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_abandoned_upload_is_removed() {
        let env = TestEnv::new().await;
        env.store.hold_puts(true);

        let task = {
            let env = env.clone();
            tokio::spawn(async move { env.ingest_text("alice", "a.txt", "never linked").await })
        };
        env.store.put_landed().await;
        assert_eq!(env.store.stored_keys(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        for _ in 0..200 {
            if env.store.stored_keys() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(env.store.stored_keys(), 0);
        assert_eq!(env.blob_count().await, 0);
        assert_eq!(env.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_abandoned_ingest_still_links_stored_bytes() {
        let env = TestEnv::new().await;
        // Hold the write lock so linking stalls once the bytes are stored
        let mut blocker = env.db.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *blocker)
            .await
            .unwrap();

        let task = {
            let env = env.clone();
            tokio::spawn(async move { env.ingest_text("alice", "a.txt", "linked anyway").await })
        };
        env.store.put_landed().await;
        task.abort();
        let _ = task.await;

        sqlx::query("COMMIT").execute(&mut *blocker).await.unwrap();
        drop(blocker);

        for _ in 0..200 {
            if env.file_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(env.file_count().await, 1);
        assert_eq!(env.blob_count().await, 1);
        assert_eq!(env.store.stored_keys(), 1);
        assert_eq!(env.store.delete_count(), 0);

        let files = FileService::list_files(&env.db, "alice", None).await.unwrap();
        let (_, data) = FileService::read_file(&env.db, &env.store_handle(), "alice", &files[0].id)
            .await
            .unwrap();
        assert_eq!(&data[..], b"linked anyway");
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads_converge() {
        let env = TestEnv::new().await;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..4 {
            let env = env.clone();
            tasks.spawn(async move {
                env.ingest_text("alice", &format!("copy-{}.txt", i), "racing bytes")
                    .await
                    .unwrap()
            });
        }

        let mut files = Vec::new();
        while let Some(file) = tasks.join_next().await {
            files.push(file.unwrap());
        }

        assert_eq!(files.len(), 4);
        assert_eq!(files.iter().filter(|f| !f.is_duplicate_of_existing).count(), 1);
        assert_eq!(env.blob_count().await, 1);
        // Every redundant upload was cleaned up again
        assert_eq!(env.store.stored_keys(), 1);
        assert_eq!(env.store.put_count() - env.store.delete_count(), 1);

        let stored_names: std::collections::HashSet<_> =
            files.iter().map(|f| f.stored_name.clone()).collect();
        assert_eq!(stored_names.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_shared_blob_until_last_reference() {
        let env = TestEnv::new().await;
        let first = env.ingest_text("alice", "a.txt", "keep me").await.unwrap();
        let second = env.ingest_text("alice", "b.txt", "keep me").await.unwrap();

        FileService::delete_file(&env.db, &env.store_handle(), "alice", &first.id)
            .await
            .unwrap();
        assert_eq!(env.blob_count().await, 1);
        assert_eq!(env.store.stored_keys(), 1);
        let (_, data) = FileService::read_file(&env.db, &env.store_handle(), "alice", &second.id)
            .await
            .unwrap();
        assert_eq!(&data[..], b"keep me");

        FileService::delete_file(&env.db, &env.store_handle(), "alice", &second.id)
            .await
            .unwrap();
        assert_eq!(env.blob_count().await, 0);
        assert_eq!(env.store.stored_keys(), 0);
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let env = TestEnv::new().await;
        let file = env.ingest_text("alice", "a.txt", "mine").await.unwrap();

        let err = FileService::delete_file(&env.db, &env.store_handle(), "mallory", &file.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotOwner));

        let err = FileService::delete_file(&env.db, &env.store_handle(), "alice", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(env.file_count().await, 1);
    }

    #[tokio::test]
    async fn test_reupload_after_release_uploads_again() {
        let env = TestEnv::new().await;
        let file = env.ingest_text("alice", "a.txt", "cycle").await.unwrap();
        FileService::delete_file(&env.db, &env.store_handle(), "alice", &file.id)
            .await
            .unwrap();

        let again = env.ingest_text("alice", "a.txt", "cycle").await.unwrap();
        assert!(!again.is_duplicate_of_existing);
        assert_eq!(env.store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_rename_and_list() {
        let env = TestEnv::new().await;
        let file = env.ingest_text("alice", "a.txt", "rename me").await.unwrap();
        env.ingest_text("bob", "b.txt", "not alice's").await.unwrap();

        let renamed = FileService::rename_file(&env.db, "alice", &file.id, "z.txt".to_string())
            .await
            .unwrap();
        assert_eq!(renamed.display_name, "z.txt");

        let listed = FileService::list_files(&env.db, "alice", None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display_name, "z.txt");

        let err = FileService::rename_file(&env.db, "bob", &file.id, "x.txt".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotOwner));
    }

    #[tokio::test]
    async fn test_retrieval_url() {
        let env = TestEnv::new().await;
        let file = env.ingest_text("alice", "a.txt", "link me").await.unwrap();
        let url = FileService::retrieval_url(
            &env.db,
            &env.store_handle(),
            "alice",
            &file.id,
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert!(url.contains(&file.stored_name));
        assert!(url.contains("signature="));
    }
}
