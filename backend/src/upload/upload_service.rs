use shared::UploadStatus;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repository::{ImageUploadStore, RepositoryError};
use crate::storage::blob_storage::{BlobStorage, StorageError};
use crate::upload::models::{ImageUpload, LifecycleError, NewImageUpload};

pub const MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Uploaded file is empty")]
    EmptyFile,
    #[error("Only image uploads are accepted, got {0}")]
    UnsupportedMediaType(String),
    #[error("File exceeds the {} MB limit", MAX_UPLOAD_BYTES / (1024 * 1024))]
    TooLarge,
    #[error("Image url must not be empty")]
    MissingUrl,
    #[error("Upload {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Creates upload records and moves them through their lifecycle.
#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn ImageUploadStore>,
    blobs: Arc<dyn BlobStorage>,
}

impl UploadService {
    pub fn new(store: Arc<dyn ImageUploadStore>, blobs: Arc<dyn BlobStorage>) -> Self {
        Self { store, blobs }
    }

    pub fn validate_file(data: &[u8], mime_type: &str) -> Result<(), UploadError> {
        if data.is_empty() {
            return Err(UploadError::EmptyFile);
        }
        if !mime_type.starts_with("image/") {
            return Err(UploadError::UnsupportedMediaType(mime_type.to_string()));
        }
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(UploadError::TooLarge);
        }
        Ok(())
    }

    /// Stores the file and records a Pending upload pointing at it.
    pub async fn create_from_bytes(
        &self,
        data: &[u8],
        original_filename: Option<String>,
        mime_type: &str,
        uploader_id: Option<Uuid>,
    ) -> Result<ImageUpload, UploadError> {
        Self::validate_file(data, mime_type)?;

        let display_name = original_filename.as_deref().unwrap_or("upload");
        let image_url = self.blobs.put(data, display_name, mime_type).await?;

        let upload = ImageUpload::new(NewImageUpload {
            image_url,
            original_filename,
            uploader_id,
            mime_type: Some(mime_type.to_string()),
            filesize: Some(data.len() as i64),
            ..Default::default()
        });
        self.store.insert_upload(&upload).await?;
        log::info!("Created upload {} ({} bytes)", upload.id, upload.filesize);
        Ok(upload)
    }

    /// Records an image that already lives elsewhere. It is not classified.
    pub async fn create_from_url(&self, new: NewImageUpload) -> Result<ImageUpload, UploadError> {
        if new.image_url.trim().is_empty() {
            return Err(UploadError::MissingUrl);
        }
        let upload = ImageUpload::new(new);
        self.store.insert_upload(&upload).await?;
        log::info!("Created upload {} from {}", upload.id, upload.image_url);
        Ok(upload)
    }

    pub async fn get(&self, id: Uuid) -> Result<ImageUpload, UploadError> {
        self.store
            .find_upload(id)
            .await?
            .ok_or(UploadError::NotFound(id))
    }

    pub async fn list(&self, status: Option<UploadStatus>) -> Result<Vec<ImageUpload>, UploadError> {
        Ok(self.store.list_uploads(status).await?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), UploadError> {
        if self.store.delete_upload(id).await? {
            Ok(())
        } else {
            Err(UploadError::NotFound(id))
        }
    }

    pub async fn mark_running(&self, id: Uuid) -> Result<ImageUpload, UploadError> {
        self.transition(id, |upload| upload.mark_running()).await
    }

    pub async fn mark_predicted(
        &self,
        id: Uuid,
        classification_id: Uuid,
    ) -> Result<ImageUpload, UploadError> {
        self.transition(id, |upload| upload.mark_predicted(classification_id))
            .await
    }

    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<ImageUpload, UploadError> {
        self.transition(id, |upload| upload.mark_failed(reason)).await
    }

    async fn transition<F>(&self, id: Uuid, apply: F) -> Result<ImageUpload, UploadError>
    where
        F: FnOnce(&mut ImageUpload) -> Result<(), LifecycleError>,
    {
        let mut upload = self.get(id).await?;
        let expected = upload.status();
        apply(&mut upload)?;
        self.store
            .update_upload(&upload, expected)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => UploadError::NotFound(id),
                RepositoryError::StatusMismatch(status) => {
                    UploadError::Lifecycle(LifecycleError::StatusChanged(status))
                }
                other => UploadError::Repository(other),
            })?;
        log::debug!("Upload {} is now {}", id, upload.status());
        Ok(upload)
    }
}
