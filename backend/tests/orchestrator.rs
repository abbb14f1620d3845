mod common;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use common::{FakeBackend, harness, predictor_config, success_json};
use mushroomvision::classification::{
    ClassificationFailure, ClassificationOrchestrator, ClassificationRecord, NewClassification,
};
use mushroomvision::db::{ClassificationStore, ImageUploadStore, MemoryRepository, RepositoryError};
use mushroomvision::storage::LocalStorage;
use mushroomvision::upload::{ImageUpload, LifecycleError, NewImageUpload, UploadError, UploadService};
use shared::UploadStatus;

#[tokio::test]
async fn successful_classification_is_persisted() {
    let backend = FakeBackend::replying(success_json("edible", 0.92));
    let h = harness(backend.clone());

    let response = h.orchestrator.classify(b"jpeg bytes".to_vec(), "chanterelle.jpg").await;

    assert!(response.success);
    assert_eq!(response.message, "Classification completed and saved");
    let result = response.result.unwrap();
    assert_eq!(result.prediction, "edible");
    assert!((result.confidence - 0.92).abs() < 1e-9);

    let record = h
        .repo
        .find_by_id(response.record_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.image_name, "chanterelle.jpg");
    assert_eq!(record.image_path, None);
    assert!((record.poisonous_probability - 0.08).abs() < 1e-9);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn empty_payload_never_reaches_the_predictor() {
    let backend = FakeBackend::replying(success_json("edible", 0.9));
    let h = harness(backend.clone());

    let response = h.orchestrator.classify(Vec::new(), "empty.jpg").await;

    assert!(!response.success);
    assert_eq!(response.message, "Invalid input: image payload is empty");
    assert!(response.result.is_none());
    assert_eq!(backend.calls(), 0);
    assert_eq!(h.repo.classification_count(), 0);
}

#[tokio::test]
async fn failures_leave_no_record() {
    let cases = [
        (
            FakeBackend::failing(ClassificationFailure::EmptyOutput),
            "Empty response from predictor",
        ),
        (
            FakeBackend::replying(r#"{"success": false, "error": "not a mushroom"}"#),
            "Prediction failed: not a mushroom",
        ),
        (
            FakeBackend::replying(r#"{"success": false}"#),
            "Prediction failed: Unknown error",
        ),
        (
            FakeBackend::failing(ClassificationFailure::Timeout(std::time::Duration::from_millis(15_000))),
            "ML prediction timed out after 15000 ms",
        ),
    ];

    for (backend, expected) in cases {
        let h = harness(backend);
        let response = h.orchestrator.classify(b"img".to_vec(), "x.jpg").await;
        assert!(!response.success);
        assert_eq!(response.message, expected);
        assert!(response.record_id.is_none());
        assert_eq!(h.repo.classification_count(), 0);
    }

    let h = harness(FakeBackend::replying("Traceback (most recent call last):"));
    let response = h.orchestrator.classify(b"img".to_vec(), "x.jpg").await;
    assert!(response.message.starts_with("malformed response"));
    assert_eq!(h.repo.classification_count(), 0);
}

#[tokio::test]
async fn upload_success_links_the_record() {
    let h = harness(FakeBackend::replying(success_json("poisonous", 0.1)));
    let upload = h
        .uploads
        .create_from_bytes(b"\x89PNG", Some("amanita.png".to_string()), "image/png", None)
        .await
        .unwrap();

    let response = h
        .orchestrator
        .classify_upload(upload.id, b"\x89PNG".to_vec())
        .await
        .unwrap();
    assert!(response.success);

    let stored = h.uploads.get(upload.id).await.unwrap();
    assert_eq!(stored.status(), UploadStatus::Predicted);
    assert_eq!(stored.classification_id(), response.record_id);
    assert!(stored.failure_reason().is_none());

    let record = h
        .repo
        .find_by_id(response.record_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.image_name, "amanita.png");
    assert_eq!(record.image_path.as_deref(), Some(upload.image_url.as_str()));
}

#[tokio::test]
async fn upload_failure_records_the_same_reason() {
    let h = harness(FakeBackend::replying(r#"{"success": false, "error": "blurry"}"#));
    let upload = h
        .uploads
        .create_from_url(NewImageUpload {
            image_url: "https://example.com/blurry.jpg".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let response = h
        .orchestrator
        .classify_upload(upload.id, b"img".to_vec())
        .await
        .unwrap();
    assert!(!response.success);

    let stored = h.uploads.get(upload.id).await.unwrap();
    assert_eq!(stored.status(), UploadStatus::Failed);
    assert_eq!(stored.failure_reason(), Some(response.message.as_str()));
    assert!(stored.classification_id().is_none());
    assert_eq!(h.repo.classification_count(), 0);
}

#[tokio::test]
async fn terminal_upload_is_not_classified_again() {
    let backend = FakeBackend::replying(success_json("edible", 0.8));
    let h = harness(backend.clone());
    let upload = h
        .uploads
        .create_from_url(NewImageUpload {
            image_url: "https://example.com/a.jpg".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    h.orchestrator
        .classify_upload(upload.id, b"img".to_vec())
        .await
        .unwrap();
    let second = h.orchestrator.classify_upload(upload.id, b"img".to_vec()).await;

    assert!(matches!(
        second,
        Err(UploadError::Lifecycle(LifecycleError::Terminal(UploadStatus::Predicted)))
    ));
    assert_eq!(backend.calls(), 1);
    assert_eq!(h.repo.classification_count(), 1);
}

#[tokio::test]
async fn unknown_upload_is_not_found() {
    let h = harness(FakeBackend::replying(success_json("edible", 0.8)));
    let id = Uuid::new_v4();
    assert!(matches!(
        h.orchestrator.classify_upload(id, b"img".to_vec()).await,
        Err(UploadError::NotFound(got)) if got == id
    ));
}

#[tokio::test]
async fn concurrent_requests_get_distinct_records() {
    let backend = FakeBackend::replying(success_json("edible", 0.7));
    let h = harness(backend.clone());

    let (a, b, c) = tokio::join!(
        h.orchestrator.classify(b"a".to_vec(), "a.jpg"),
        h.orchestrator.classify(b"b".to_vec(), "b.jpg"),
        h.orchestrator.classify(b"c".to_vec(), "c.jpg"),
    );

    let ids: std::collections::HashSet<_> = [a, b, c]
        .iter()
        .map(|r| r.record_id.unwrap())
        .collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(backend.calls(), 3);

    let records = h.repo.find_all().await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records[0].created_at > records[1].created_at);
    assert!(records[1].created_at > records[2].created_at);
}

struct UnavailableStore;

#[async_trait]
impl ClassificationStore for UnavailableStore {
    async fn save(&self, _new: NewClassification) -> Result<ClassificationRecord, RepositoryError> {
        Err(RepositoryError::DynamoDb("service unavailable".to_string()))
    }

    async fn find_by_id(&self, _id: Uuid) -> Result<Option<ClassificationRecord>, RepositoryError> {
        Ok(None)
    }

    async fn find_all(&self) -> Result<Vec<ClassificationRecord>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _id: Uuid) -> Result<bool, RepositoryError> {
        Ok(false)
    }
}

#[tokio::test]
async fn save_failure_marks_upload_failed() {
    let repo = MemoryRepository::new();
    let blob_dir = tempfile::tempdir().unwrap();
    let uploads = UploadService::new(
        Arc::new(repo.clone()),
        Arc::new(LocalStorage::new(blob_dir.path(), "http://localhost:8081")),
    );
    let orchestrator = ClassificationOrchestrator::new(
        FakeBackend::replying(success_json("edible", 0.9)),
        Arc::new(UnavailableStore),
        uploads.clone(),
        &predictor_config(),
    );
    let upload = uploads
        .create_from_url(NewImageUpload {
            image_url: "https://example.com/a.jpg".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let response = orchestrator
        .classify_upload(upload.id, b"img".to_vec())
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(
        response.message,
        "Failed to save classification: DynamoDB error: service unavailable"
    );
    let stored = uploads.get(upload.id).await.unwrap();
    assert_eq!(stored.status(), UploadStatus::Failed);
    assert_eq!(stored.failure_reason(), Some(response.message.as_str()));
}

#[tokio::test]
async fn empty_upload_payload_fails_the_upload() {
    let backend = FakeBackend::replying(success_json("edible", 0.9));
    let h = harness(backend.clone());
    let upload = h
        .uploads
        .create_from_url(NewImageUpload {
            image_url: "https://example.com/empty.jpg".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let response = h
        .orchestrator
        .classify_upload(upload.id, Vec::new())
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(response.message, "Invalid input: image payload is empty");
    let stored = h.uploads.get(upload.id).await.unwrap();
    assert_eq!(stored.status(), UploadStatus::Failed);
    assert_eq!(stored.failure_reason(), Some(response.message.as_str()));
    assert_eq!(backend.calls(), 0);
    assert_eq!(h.repo.classification_count(), 0);
}

/// Accepts the first update and rejects the second one.
struct ThrottledSecondUpdate {
    inner: MemoryRepository,
    updates: AtomicUsize,
}

#[async_trait]
impl ImageUploadStore for ThrottledSecondUpdate {
    async fn insert_upload(&self, upload: &ImageUpload) -> Result<(), RepositoryError> {
        self.inner.insert_upload(upload).await
    }

    async fn update_upload(
        &self,
        upload: &ImageUpload,
        expected: UploadStatus,
    ) -> Result<(), RepositoryError> {
        if self.updates.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(RepositoryError::DynamoDb("throttled".to_string()));
        }
        self.inner.update_upload(upload, expected).await
    }

    async fn find_upload(&self, id: Uuid) -> Result<Option<ImageUpload>, RepositoryError> {
        self.inner.find_upload(id).await
    }

    async fn list_uploads(&self, status: Option<UploadStatus>) -> Result<Vec<ImageUpload>, RepositoryError> {
        self.inner.list_uploads(status).await
    }

    async fn delete_upload(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_upload(id).await
    }
}

#[tokio::test]
async fn failed_link_fails_the_upload_and_drops_the_record() {
    let repo = MemoryRepository::new();
    let blob_dir = tempfile::tempdir().unwrap();
    let uploads = UploadService::new(
        Arc::new(ThrottledSecondUpdate {
            inner: repo.clone(),
            updates: AtomicUsize::new(0),
        }),
        Arc::new(LocalStorage::new(blob_dir.path(), "http://localhost:8081")),
    );
    let orchestrator = ClassificationOrchestrator::new(
        FakeBackend::replying(success_json("edible", 0.9)),
        Arc::new(repo.clone()),
        uploads.clone(),
        &predictor_config(),
    );
    let upload = uploads
        .create_from_url(NewImageUpload {
            image_url: "https://example.com/a.jpg".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let response = orchestrator
        .classify_upload(upload.id, b"img".to_vec())
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(
        response.message,
        "Failed to save classification: DynamoDB error: throttled"
    );
    let stored = uploads.get(upload.id).await.unwrap();
    assert_eq!(stored.status(), UploadStatus::Failed);
    assert_eq!(stored.failure_reason(), Some(response.message.as_str()));
    assert_eq!(repo.classification_count(), 0);
}
