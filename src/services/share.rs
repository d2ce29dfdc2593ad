use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{
    format_timestamp, is_storable, now_timestamp, ClientInfo, ConsumeWarning, CreateShareRequest,
    DownloadEvent, ResolvedShare, ShareDownload, ShareListItem, ShareState, ShareToken,
    UpdateShareRequest,
};
use crate::services::FileService;
use crate::storage::BlobStore;

const TOKEN_ATTEMPTS: usize = 10;

#[derive(FromRow)]
struct ShareRow {
    #[sqlx(flatten)]
    share: ShareToken,
    file_name: String,
}

pub struct ShareService;

impl ShareService {
    /// Issue a share token for a file the caller owns
    pub async fn issue(
        db: &Database,
        owner_id: &str,
        req: CreateShareRequest,
        token_length: usize,
    ) -> Result<ShareToken> {
        let file = FileService::get_owned_file(db, owner_id, &req.file_id).await?;
        Self::validate_limits(req.expires_at, req.max_downloads)?;

        let share_id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let expires_at = req.expires_at.map(format_timestamp);

        let mut last_error: Option<sqlx::Error> = None;
        for _ in 0..TOKEN_ATTEMPTS {
            let candidate: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(token_length)
                .map(char::from)
                .collect();

            let result = sqlx::query(
                r#"
                INSERT INTO share_tokens (id, logical_file_id, token, is_active, expires_at, max_downloads, download_count, created_at, updated_at)
                VALUES (?, ?, ?, 1, ?, ?, 0, ?, ?)
                "#,
            )
            .bind(&share_id)
            .bind(&file.id)
            .bind(&candidate)
            .bind(&expires_at)
            .bind(req.max_downloads)
            .bind(&now)
            .bind(&now)
            .execute(db.pool())
            .await;

            match result {
                Ok(_) => {
                    tracing::info!(share_id = %share_id, file_id = %file.id, "Issued share token");
                    return Self::get_share(db, &share_id).await;
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    last_error = Some(sqlx::Error::Database(e));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(format!(
            "Failed to generate unique share token: {}",
            last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )))
    }

    fn validate_limits(
        expires_at: Option<chrono::DateTime<Utc>>,
        max_downloads: Option<i64>,
    ) -> Result<()> {
        if let Some(expires_at) = expires_at {
            if expires_at <= Utc::now() || !is_storable(expires_at) {
                return Err(AppError::InvalidExpiry);
            }
        }
        if let Some(max) = max_downloads {
            if max <= 0 {
                return Err(AppError::InvalidLimit);
            }
        }
        Ok(())
    }

    /// Get share by ID
    pub async fn get_share(db: &Database, id: &str) -> Result<ShareToken> {
        sqlx::query_as("SELECT * FROM share_tokens WHERE id = ?")
            .bind(id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Share not found".to_string()))
    }

    async fn get_owned_share(db: &Database, owner_id: &str, id: &str) -> Result<ShareToken> {
        let share = Self::get_share(db, id).await?;
        FileService::get_owned_file(db, owner_id, &share.logical_file_id).await?;
        Ok(share)
    }

    /// Resolve a token to its file and blob, only while the share is active
    pub async fn resolve(db: &Database, token: &str) -> Result<ResolvedShare> {
        let share: ShareToken = sqlx::query_as("SELECT * FROM share_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;

        let state = share.state();
        if state != ShareState::Active {
            tracing::debug!(share_id = %share.id, ?state, "Share token not usable");
            return Err(AppError::Unavailable);
        }

        let file = FileService::get_file(db, &share.logical_file_id).await?;
        let blob = FileService::get_file_blob(db, &file).await?;

        Ok(ResolvedShare { share, file, blob })
    }

    /// Retrieve the shared bytes and record the download.
    ///
    /// The download counter is claimed with a single conditional update, so
    /// a limit of N admits at most N retrievals however many race for it.
    /// Bookkeeping failures after a successful claim are returned as
    /// warnings alongside the bytes.
    pub async fn consume(
        db: &Database,
        store: &Arc<dyn BlobStore>,
        token: &str,
        client: ClientInfo,
    ) -> Result<ShareDownload> {
        let resolved = Self::resolve(db, token).await?;

        let data = FileService::fetch_blob(store, &resolved.blob)
            .await
            .map_err(|e| {
                tracing::warn!(share_id = %resolved.share.id, "Shared blob could not be fetched: {}", e);
                AppError::Unavailable
            })?;

        let now = now_timestamp();
        let mut warnings = Vec::new();

        let claimed = sqlx::query(
            r#"
            UPDATE share_tokens
            SET download_count = download_count + 1, updated_at = ?
            WHERE id = ?
              AND is_active = 1
              AND (expires_at IS NULL OR expires_at > ?)
              AND (max_downloads IS NULL OR download_count < max_downloads)
            "#,
        )
        .bind(&now)
        .bind(&resolved.share.id)
        .bind(&now)
        .execute(db.pool())
        .await;

        match claimed {
            Ok(result) if result.rows_affected() == 0 => {
                tracing::debug!(share_id = %resolved.share.id, "Share became unavailable during download");
                return Err(AppError::Unavailable);
            }
            Ok(_) => {
                if let Err(e) = Self::record_event(db, &resolved.share.id, &client, &now).await {
                    tracing::warn!(share_id = %resolved.share.id, "Download event not recorded: {}", e);
                    warnings.push(ConsumeWarning::EventNotRecorded(e.to_string()));
                }
            }
            Err(e) => {
                tracing::warn!(share_id = %resolved.share.id, "Download count not recorded: {}", e);
                warnings.push(ConsumeWarning::CountNotRecorded(e.to_string()));
            }
        }

        Ok(ShareDownload {
            data,
            file_name: resolved.file.display_name,
            media_type: resolved.file.media_type,
            size_bytes: resolved.file.size_bytes,
            warnings,
        })
    }

    async fn record_event(
        db: &Database,
        share_id: &str,
        client: &ClientInfo,
        occurred_at: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_events (id, share_token_id, client_address, client_agent, occurred_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(share_id)
        .bind(&client.address)
        .bind(&client.agent)
        .bind(occurred_at)
        .execute(db.pool())
        .await?;
        Ok(())
    }

    /// Enable or disable a share, or change its limits
    pub async fn update_share(
        db: &Database,
        owner_id: &str,
        share_id: &str,
        req: UpdateShareRequest,
    ) -> Result<ShareToken> {
        let share = Self::get_owned_share(db, owner_id, share_id).await?;
        Self::validate_limits(req.expires_at, req.max_downloads)?;

        sqlx::query(
            r#"
            UPDATE share_tokens
            SET is_active = COALESCE(?, is_active),
                expires_at = COALESCE(?, expires_at),
                max_downloads = COALESCE(?, max_downloads),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(req.is_active)
        .bind(req.expires_at.map(format_timestamp))
        .bind(req.max_downloads)
        .bind(now_timestamp())
        .bind(&share.id)
        .execute(db.pool())
        .await?;

        Self::get_share(db, &share.id).await
    }

    /// Delete a share
    pub async fn delete_share(db: &Database, owner_id: &str, share_id: &str) -> Result<()> {
        let share = Self::get_owned_share(db, owner_id, share_id).await?;

        sqlx::query("DELETE FROM share_tokens WHERE id = ?")
            .bind(&share.id)
            .execute(db.pool())
            .await?;

        Ok(())
    }

    /// Owner's shares with file names and current state
    pub async fn list_shares(db: &Database, owner_id: &str) -> Result<Vec<ShareListItem>> {
        let rows: Vec<ShareRow> = sqlx::query_as(
            r#"
            SELECT s.*, f.display_name AS file_name
            FROM share_tokens s
            JOIN logical_files f ON s.logical_file_id = f.id
            WHERE f.owner_id = ?
            ORDER BY s.created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(db.pool())
        .await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|row| ShareListItem {
                state: row.share.state_at(now),
                share: row.share,
                file_name: row.file_name,
            })
            .collect())
    }

    /// Download history of one share, newest first
    pub async fn list_download_events(
        db: &Database,
        owner_id: &str,
        share_id: &str,
    ) -> Result<Vec<DownloadEvent>> {
        let share = Self::get_owned_share(db, owner_id, share_id).await?;

        let events = sqlx::query_as(
            "SELECT * FROM download_events WHERE share_token_id = ? ORDER BY occurred_at DESC",
        )
        .bind(&share.id)
        .fetch_all(db.pool())
        .await?;
        Ok(events)
    }
}
