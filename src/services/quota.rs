use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::QuotaResponse;

/// Per-owner storage accounting over unique bytes.
///
/// Usage is always derived from the logical file registry; there is no
/// stored counter. Checks are advisory: two concurrent uploads from one
/// owner can both pass and jointly exceed the cap.
pub struct QuotaService;

impl QuotaService {
    /// Bytes charged to an owner: each distinct hash among the owner's
    /// non-duplicate files counted once
    pub async fn usage(db: &Database, owner_id: &str) -> Result<u64> {
        let used: (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(b.size_bytes), 0)
            FROM blob_records b
            WHERE b.content_hash IN (
                SELECT DISTINCT content_hash
                FROM logical_files
                WHERE owner_id = ? AND is_duplicate_of_existing = 0
            )
            "#,
        )
        .bind(owner_id)
        .fetch_one(db.pool())
        .await?;

        Ok(used.0.max(0) as u64)
    }

    /// Reject an upload of `incoming` bytes that would take the owner past `limit`
    pub async fn check_quota(
        db: &Database,
        owner_id: &str,
        incoming: u64,
        limit: Option<u64>,
    ) -> Result<()> {
        let Some(limit) = limit else {
            return Ok(());
        };

        let used = Self::usage(db, owner_id).await?;
        if used.saturating_add(incoming) > limit {
            tracing::info!(owner_id, used, incoming, limit, "Upload rejected by quota");
            return Err(AppError::QuotaExceeded {
                used,
                incoming,
                limit,
            });
        }

        Ok(())
    }

    /// Usage and cap for display
    pub async fn report(db: &Database, owner_id: &str, limit: Option<u64>) -> Result<QuotaResponse> {
        Ok(QuotaResponse {
            used: Self::usage(db, owner_id).await?,
            limit,
        })
    }
}
