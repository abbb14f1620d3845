use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::UploadStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::classification::models::{ClassificationRecord, NewClassification};
use crate::db::repository::{ClassificationStore, ImageUploadStore, RepositoryError, newest_first};
use crate::upload::models::ImageUpload;

#[derive(Default)]
struct ClassificationTable {
    records: HashMap<Uuid, ClassificationRecord>,
    last_created_at: Option<DateTime<Utc>>,
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    classifications: Arc<Mutex<ClassificationTable>>,
    uploads: Arc<Mutex<HashMap<Uuid, ImageUpload>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex.lock().map_err(|_| RepositoryError::Poisoned)
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classification_count(&self) -> usize {
        self.classifications
            .lock()
            .map(|t| t.records.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ClassificationStore for MemoryRepository {
    async fn save(&self, new: NewClassification) -> Result<ClassificationRecord, RepositoryError> {
        let mut table = lock(&self.classifications)?;

        // Creation times are strictly increasing so no two records share one.
        let mut created_at = Utc::now();
        if let Some(last) = table.last_created_at {
            if created_at <= last {
                created_at = last + Duration::microseconds(1);
            }
        }
        table.last_created_at = Some(created_at);

        let record = new.into_record(Uuid::new_v4(), created_at);
        table.records.insert(record.id, record.clone());
        log::debug!("Saved classification {} ({})", record.id, record.prediction);
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClassificationRecord>, RepositoryError> {
        Ok(lock(&self.classifications)?.records.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<ClassificationRecord>, RepositoryError> {
        let mut records: Vec<_> = lock(&self.classifications)?
            .records
            .values()
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(lock(&self.classifications)?.records.remove(&id).is_some())
    }
}

#[async_trait]
impl ImageUploadStore for MemoryRepository {
    async fn insert_upload(&self, upload: &ImageUpload) -> Result<(), RepositoryError> {
        lock(&self.uploads)?.insert(upload.id, upload.clone());
        Ok(())
    }

    async fn update_upload(
        &self,
        upload: &ImageUpload,
        expected: UploadStatus,
    ) -> Result<(), RepositoryError> {
        let mut uploads = lock(&self.uploads)?;
        match uploads.get_mut(&upload.id) {
            Some(existing) if existing.status() == expected => {
                *existing = upload.clone();
                Ok(())
            }
            Some(_) => Err(RepositoryError::StatusMismatch(expected)),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn find_upload(&self, id: Uuid) -> Result<Option<ImageUpload>, RepositoryError> {
        Ok(lock(&self.uploads)?.get(&id).cloned())
    }

    async fn list_uploads(&self, status: Option<UploadStatus>) -> Result<Vec<ImageUpload>, RepositoryError> {
        let mut uploads: Vec<_> = lock(&self.uploads)?
            .values()
            .filter(|u| status.is_none_or(|s| u.status() == s))
            .cloned()
            .collect();
        uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(uploads)
    }

    async fn delete_upload(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(lock(&self.uploads)?.remove(&id).is_some())
    }
}
