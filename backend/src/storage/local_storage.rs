use async_trait::async_trait;
use std::path::PathBuf;

use crate::storage::blob_storage::{BlobStorage, StorageError, image_key};

/// Writes images under a directory that the server exposes at `/static`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn put(&self, data: &[u8], file_name: &str, mime_type: &str) -> Result<String, StorageError> {
        let key = image_key(data, mime_type)?;
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        log::debug!("Stored {} at {}", file_name, path.display());
        Ok(format!("{}/static/{}", self.public_base_url, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_content_addressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:8081/");

        let url = storage.put(b"abc", "a.png", "image/png").await.unwrap();
        let again = storage.put(b"abc", "b.png", "image/png").await.unwrap();

        assert_eq!(url, again);
        assert!(url.starts_with("http://localhost:8081/static/images/"));
        assert!(url.ends_with(".png"));

        let key = url.trim_start_matches("http://localhost:8081/static/");
        let written = tokio::fs::read(dir.path().join(key)).await.unwrap();
        assert_eq!(written, b"abc");
    }
}
