use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::error::Result;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        // WAL plus a busy timeout lets concurrent writers queue instead of failing
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Create connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        // One row per distinct content hash
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blob_records (
                content_hash TEXT PRIMARY KEY,
                storage_key TEXT NOT NULL UNIQUE,
                storage_locator TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                media_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // No cascade: a blob row may only go once nothing references it
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS logical_files (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                folder_id TEXT,
                display_name TEXT NOT NULL,
                stored_name TEXT NOT NULL,
                media_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                is_duplicate_of_existing INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (content_hash) REFERENCES blob_records(content_hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS share_tokens (
                id TEXT PRIMARY KEY,
                logical_file_id TEXT NOT NULL,
                token TEXT UNIQUE NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                expires_at TEXT,
                max_downloads INTEGER,
                download_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (logical_file_id) REFERENCES logical_files(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS download_events (
                id TEXT PRIMARY KEY,
                share_token_id TEXT NOT NULL,
                client_address TEXT,
                client_agent TEXT,
                occurred_at TEXT NOT NULL,
                FOREIGN KEY (share_token_id) REFERENCES share_tokens(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logical_files_owner_id ON logical_files(owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logical_files_content_hash ON logical_files(content_hash)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_share_tokens_logical_file_id ON share_tokens(logical_file_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_download_events_share_token_id ON download_events(share_token_id)")
            .execute(&self.pool)
            .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        db.run_migrations().await.unwrap();
        db.run_migrations().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<_> = tables.into_iter().map(|t| t.0).collect();
        assert_eq!(
            names,
            vec!["blob_records", "download_events", "logical_files", "share_tokens"]
        );
    }

    #[tokio::test]
    async fn test_dangling_content_hash_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        db.run_migrations().await.unwrap();

        let result = sqlx::query(
            r#"
            INSERT INTO logical_files (id, owner_id, display_name, stored_name, media_type, size_bytes, content_hash, created_at, updated_at)
            VALUES ('f', 'o', 'n', 'k', 't', 1, 'missing', 'now', 'now')
            "#,
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }
}
