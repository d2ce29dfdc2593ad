use sqlx::SqliteConnection;

use crate::error::{AppError, Result};
use crate::models::{now_timestamp, BlobRecord, NewBlobRecord};

/// Content hash → physical blob mapping.
///
/// Every operation runs on a borrowed connection so callers can compose
/// several of them inside one transaction.
pub struct BlobRegistry;

impl BlobRegistry {
    /// Look up the blob stored for a content hash
    pub async fn find_by_hash(conn: &mut SqliteConnection, hash: &str) -> Result<Option<BlobRecord>> {
        let record = sqlx::query_as("SELECT * FROM blob_records WHERE content_hash = ?")
            .bind(hash)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(record)
    }

    pub async fn find_by_storage_key(
        conn: &mut SqliteConnection,
        storage_key: &str,
    ) -> Result<Option<BlobRecord>> {
        let record = sqlx::query_as("SELECT * FROM blob_records WHERE storage_key = ?")
            .bind(storage_key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(record)
    }

    /// Register a new blob.
    ///
    /// Fails with `AlreadyRegistered` when another writer got there first;
    /// the insert itself is the uniqueness check.
    pub async fn register(conn: &mut SqliteConnection, new: &NewBlobRecord) -> Result<BlobRecord> {
        let now = now_timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO blob_records (content_hash, storage_key, storage_locator, size_bytes, media_type, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO NOTHING
            "#,
        )
        .bind(&new.content_hash)
        .bind(&new.storage_key)
        .bind(&new.storage_locator)
        .bind(new.size_bytes)
        .bind(&new.media_type)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::AlreadyRegistered);
        }

        Ok(BlobRecord {
            content_hash: new.content_hash.clone(),
            storage_key: new.storage_key.clone(),
            storage_locator: new.storage_locator.clone(),
            size_bytes: new.size_bytes,
            media_type: new.media_type.clone(),
            created_at: now,
        })
    }

    /// Insert the blob, or return the record that already holds its hash.
    ///
    /// The flag is `true` when this call created the record.
    pub async fn insert_or_fetch(
        conn: &mut SqliteConnection,
        new: &NewBlobRecord,
    ) -> Result<(BlobRecord, bool)> {
        match Self::register(conn, new).await {
            Ok(record) => Ok((record, true)),
            Err(AppError::AlreadyRegistered) => {
                let existing = Self::find_by_hash(conn, &new.content_hash)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal("Blob vanished during registration".to_string())
                    })?;
                tracing::debug!(hash = %new.content_hash, "Blob registered concurrently, reusing winner");
                Ok((existing, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the metadata row for `hash` if no logical file references it.
    ///
    /// Returns the removed record so the caller can delete the bytes; the
    /// blob store is never touched here.
    pub async fn unregister(conn: &mut SqliteConnection, hash: &str) -> Result<Option<BlobRecord>> {
        let Some(record) = Self::find_by_hash(conn, hash).await? else {
            return Ok(None);
        };

        let result = sqlx::query(
            r#"
            DELETE FROM blob_records
            WHERE content_hash = ?
              AND NOT EXISTS (SELECT 1 FROM logical_files WHERE content_hash = ?)
            "#,
        )
        .bind(hash)
        .bind(hash)
        .execute(&mut *conn)
        .await?;

        Ok((result.rows_affected() > 0).then_some(record))
    }
}
