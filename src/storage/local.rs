use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::{BlobStore, UrlSigner};

/// Local file system blob store
pub struct LocalStorage {
    base_path: PathBuf,
    signer: UrlSigner,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            base_path: base_path.into(),
            signer,
        }
    }

    /// Resolve a storage key below the base path, refusing anything that
    /// could escape it.
    fn get_full_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AppError::BadRequest("Invalid storage key".to_string()));
        }
        Ok(self.base_path.join(relative))
    }

    async fn write_then_rename(temp_path: &Path, full_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(temp_path, full_path).await
    }

    fn unavailable(action: &str, e: std::io::Error) -> AppError {
        AppError::StoreUnavailable(format!("Failed to {} blob: {}", action, e))
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<String> {
        let full_path = self.get_full_path(key)?;

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::unavailable("store", e))?;
        }

        // Write to a sibling temp file first so readers never see a partial blob
        let temp_path = full_path.with_extension("partial");
        if let Err(e) = Self::write_then_rename(&temp_path, &full_path, &data).await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial blob {:?}: {}", temp_path, cleanup);
                }
            }
            return Err(Self::unavailable("store", e));
        }

        tracing::debug!("Saved blob to {:?}", full_path);
        Ok(format!("local:{}", key))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(key)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound("Blob not found".to_string())
            } else {
                Self::unavailable("read", e)
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.get_full_path(key)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => tracing::debug!("Deleted blob {:?}", full_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Self::unavailable("delete", e)),
        }

        // Try to remove empty parent directories
        let mut current_dir = full_path.parent().map(|p| p.to_path_buf());
        while let Some(dir) = current_dir {
            if dir == self.base_path {
                break;
            }
            match fs::read_dir(&dir).await {
                Ok(mut entries) => {
                    if entries.next_entry().await?.is_some() {
                        break; // Not empty
                    }
                    let _ = fs::remove_dir(&dir).await;
                }
                Err(_) => break,
            }
            current_dir = dir.parent().map(|p| p.to_path_buf());
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.get_full_path(key)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn issue_timed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        // Validate the key even though nothing is read here
        self.get_full_path(key)?;
        self.signer.sign_url(key, ttl)
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, UrlSigner::new("secret", "http://localhost"))
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let locator = store
            .put("ab/abcdef", Bytes::from_static(b"payload"), "text/plain")
            .await
            .unwrap();
        assert_eq!(locator, "local:ab/abcdef");
        assert!(store.exists("ab/abcdef").await.unwrap());
        assert_eq!(store.get("ab/abcdef").await.unwrap(), Bytes::from_static(b"payload"));

        store.delete("ab/abcdef").await.unwrap();
        assert!(!store.exists("ab/abcdef").await.unwrap());
        // Empty shard directory is pruned, base directory kept
        assert!(!dir.path().join("ab").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        // A directory squatting on the final path makes the rename fail
        std::fs::create_dir_all(dir.path().join("ab/blocked/inner")).unwrap();

        let err = store
            .put("ab/blocked", Bytes::from_static(b"payload"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert!(!dir.path().join("ab/blocked.partial").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).delete("zz/missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path()).get("zz/missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for key in ["../etc/passwd", "/etc/passwd", "ab/../../x", ""] {
            assert!(matches!(
                store.get(key).await,
                Err(AppError::BadRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_timed_url() {
        let dir = tempfile::tempdir().unwrap();
        let url = store(dir.path())
            .issue_timed_url("ab/abcdef", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost/api/v1/blobs/ab/abcdef?expires="));
    }
}
