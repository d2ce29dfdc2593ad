//! Shared fixtures for unit tests: a migrated database in a temp dir and a
//! local blob store that counts and can fail on demand.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::config::StorageConfig;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{IngestRequest, LogicalFile};
use crate::services::FileService;
use crate::storage::{BlobStore, LocalStorage, UrlSigner};

pub const TEST_SECRET: &str = "test-secret";
pub const TEST_BASE_URL: &str = "http://localhost:1310";

pub struct CountingStore {
    inner: LocalStorage,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    hold_puts: AtomicBool,
    put_landed: Notify,
    keys: Mutex<HashSet<String>>,
}

impl CountingStore {
    fn new(inner: LocalStorage) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_gets: AtomicBool::new(false),
            hold_puts: AtomicBool::new(false),
            put_landed: Notify::new(),
            keys: Mutex::new(HashSet::new()),
        }
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Keys currently holding bytes
    pub fn stored_keys(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Park every put forever once its bytes are written
    pub fn hold_puts(&self, hold: bool) {
        self.hold_puts.store(hold, Ordering::SeqCst);
    }

    /// Wait for a put to finish writing its bytes
    pub async fn put_landed(&self) {
        self.put_landed.notified().await;
    }
}

#[async_trait]
impl BlobStore for CountingStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("injected put failure".to_string()));
        }
        let locator = self.inner.put(key, data, content_type).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().insert(key.to_string());
        self.put_landed.notify_one();
        if self.hold_puts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(locator)
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("injected get failure".to_string()));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn issue_timed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.inner.issue_timed_url(key, ttl).await
    }

    fn storage_type(&self) -> &'static str {
        "counting"
    }
}

#[derive(Clone)]
pub struct TestEnv {
    pub db: Database,
    pub store: Arc<CountingStore>,
    pub config: StorageConfig,
    _dir: Arc<TempDir>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_limits(1024 * 1024, 0).await
    }

    /// Environment with a size cap and quota; a quota of 0 disables it
    pub async fn with_limits(max_file_size: u64, quota_bytes: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        db.run_migrations().await.unwrap();

        let blob_path = dir.path().join("blobs");
        let signer = UrlSigner::new(TEST_SECRET, TEST_BASE_URL);
        let store = Arc::new(CountingStore::new(LocalStorage::new(blob_path.clone(), signer)));

        let config = StorageConfig {
            local_path: blob_path.to_string_lossy().into_owned(),
            max_file_size,
            quota_bytes,
            url_secret: TEST_SECRET.to_string(),
            ..StorageConfig::default()
        };

        Self {
            db,
            store,
            config,
            _dir: Arc::new(dir),
        }
    }

    pub fn store_handle(&self) -> Arc<dyn BlobStore> {
        self.store.clone()
    }

    pub async fn ingest(&self, req: IngestRequest, data: &[u8]) -> Result<LogicalFile> {
        FileService::ingest(
            &self.db,
            &self.store_handle(),
            &self.config,
            req,
            byte_chunks(data),
        )
        .await
    }

    pub async fn ingest_text(&self, owner: &str, name: &str, text: &str) -> Result<LogicalFile> {
        self.ingest(text_request(owner, name), text.as_bytes()).await
    }

    pub async fn blob_count(&self) -> i64 {
        Self::count(&self.db, "SELECT COUNT(*) FROM blob_records").await
    }

    pub async fn file_count(&self) -> i64 {
        Self::count(&self.db, "SELECT COUNT(*) FROM logical_files").await
    }

    async fn count(db: &Database, sql: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(sql).fetch_one(db.pool()).await.unwrap();
        row.0
    }
}

pub fn text_request(owner: &str, name: &str) -> IngestRequest {
    IngestRequest {
        owner_id: owner.to_string(),
        file_name: name.to_string(),
        declared_type: Some("text/plain".to_string()),
        declared_size: None,
        folder_id: None,
    }
}

/// Feed `data` to the pipeline in small chunks, the way multipart arrives
pub fn byte_chunks(data: &[u8]) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin + Send {
    let chunks: Vec<std::io::Result<Bytes>> = data
        .chunks(7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    futures_util::stream::iter(chunks)
}
