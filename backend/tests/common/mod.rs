#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mushroomvision::classification::{ClassificationFailure, ClassificationOrchestrator, ClassificationRequest};
use mushroomvision::db::MemoryRepository;
use mushroomvision::predictor::process::RawProcessResult;
use mushroomvision::predictor::{InferenceBackend, PredictorConfig};
use mushroomvision::storage::LocalStorage;
use mushroomvision::upload::UploadService;

pub fn success_json(prediction: &str, edible: f64) -> String {
    let confidence = if prediction == "edible" { edible } else { 1.0 - edible };
    format!(
        r#"{{"success": true, "result": {{"prediction": "{}", "confidence": {}, "probabilities": {{"edible": {}, "poisonous": {}}}}}}}"#,
        prediction,
        confidence,
        edible,
        1.0 - edible
    )
}

/// Backend that answers every call with the same canned result.
pub struct FakeBackend {
    reply: RawProcessResult,
    calls: AtomicUsize,
    seen_names: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn replying(raw: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(raw.into()),
            calls: AtomicUsize::new(0),
            seen_names: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(failure: ClassificationFailure) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(failure),
            calls: AtomicUsize::new(0),
            seen_names: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_names(&self) -> Vec<String> {
        self.seen_names.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn invoke(&self, request: &ClassificationRequest, _deadline: Duration) -> RawProcessResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_names
            .lock()
            .unwrap()
            .push(request.image_name().to_string());
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.reply.clone()
    }
}

pub fn predictor_config() -> PredictorConfig {
    PredictorConfig::new("/srv/predict.py", "/srv/model.pth").with_timeout_ms(2_000)
}

pub struct Harness {
    pub orchestrator: ClassificationOrchestrator,
    pub repo: MemoryRepository,
    pub uploads: UploadService,
    pub blob_dir: TempDir,
}

pub fn harness(backend: Arc<dyn InferenceBackend>) -> Harness {
    let repo = MemoryRepository::new();
    let blob_dir = tempfile::tempdir().unwrap();
    let uploads = UploadService::new(
        Arc::new(repo.clone()),
        Arc::new(LocalStorage::new(blob_dir.path(), "http://localhost:8081")),
    );
    let orchestrator = ClassificationOrchestrator::new(
        backend,
        Arc::new(repo.clone()),
        uploads.clone(),
        &predictor_config(),
    );
    Harness {
        orchestrator,
        repo,
        uploads,
        blob_dir,
    }
}
