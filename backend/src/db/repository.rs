use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::UploadStatus;
use uuid::Uuid;

use crate::classification::models::{ClassificationRecord, NewClassification};
use crate::upload::models::ImageUpload;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
    #[error("Item changed concurrently; expected status {0}")]
    StatusMismatch(UploadStatus),
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Append-only storage for successful classifications.
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Assigns the record's id and creation time and persists it.
    async fn save(&self, new: NewClassification) -> Result<ClassificationRecord, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClassificationRecord>, RepositoryError>;

    async fn find_all(&self) -> Result<Vec<ClassificationRecord>, RepositoryError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;

    async fn find_by_prediction(
        &self,
        prediction: &str,
    ) -> Result<Vec<ClassificationRecord>, RepositoryError> {
        let mut records: Vec<_> = self
            .find_all()
            .await?
            .into_iter()
            .filter(|r| r.prediction.eq_ignore_ascii_case(prediction))
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn find_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ClassificationRecord>, RepositoryError> {
        let mut records: Vec<_> = self
            .find_all()
            .await?
            .into_iter()
            .filter(|r| r.created_at >= start && r.created_at <= end)
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn find_by_min_confidence(
        &self,
        min_confidence: f64,
    ) -> Result<Vec<ClassificationRecord>, RepositoryError> {
        let mut records: Vec<_> = self
            .find_all()
            .await?
            .into_iter()
            .filter(|r| r.confidence >= min_confidence)
            .collect();
        records.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(records)
    }

    async fn count_by_prediction(&self, prediction: &str) -> Result<u64, RepositoryError> {
        Ok(self.find_by_prediction(prediction).await?.len() as u64)
    }

    async fn average_confidence_by_prediction(
        &self,
        prediction: &str,
    ) -> Result<Option<f64>, RepositoryError> {
        let records = self.find_by_prediction(prediction).await?;
        if records.is_empty() {
            return Ok(None);
        }
        let total: f64 = records.iter().map(|r| r.confidence).sum();
        Ok(Some(total / records.len() as f64))
    }
}

#[async_trait]
pub trait ImageUploadStore: Send + Sync {
    async fn insert_upload(&self, upload: &ImageUpload) -> Result<(), RepositoryError>;

    /// Overwrites an existing upload whose stored status is still `expected`.
    /// `NotFound` if it was never inserted, `StatusMismatch` if another
    /// writer moved it first.
    async fn update_upload(
        &self,
        upload: &ImageUpload,
        expected: UploadStatus,
    ) -> Result<(), RepositoryError>;

    async fn find_upload(&self, id: Uuid) -> Result<Option<ImageUpload>, RepositoryError>;

    /// Newest first, optionally restricted to one status.
    async fn list_uploads(&self, status: Option<UploadStatus>) -> Result<Vec<ImageUpload>, RepositoryError>;

    async fn delete_upload(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

pub(crate) fn newest_first(records: &mut [ClassificationRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
