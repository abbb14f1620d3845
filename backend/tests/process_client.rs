#![cfg(unix)]

mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use common::success_json;
use mushroomvision::classification::{ClassificationFailure, ClassificationOrchestrator, ClassificationRequest};
use mushroomvision::db::MemoryRepository;
use mushroomvision::predictor::{
    InferenceBackend, InferenceProcessClient, PredictorConfig, ProcessSpawner, TokioSpawner,
    WorkerProcess,
};
use mushroomvision::storage::LocalStorage;
use mushroomvision::upload::{NewImageUpload, UploadService};
use shared::UploadStatus;

fn write_script(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("predict.sh");
    std::fs::write(&path, body).unwrap();
    path
}

fn client_for(script: &Path, timeout_ms: u64) -> InferenceProcessClient {
    let config = PredictorConfig::new(script, "/models/mushroom.pth")
        .with_executable("sh")
        .with_timeout_ms(timeout_ms);
    InferenceProcessClient::new(config)
}

fn request() -> ClassificationRequest {
    ClassificationRequest::new(b"\xff\xd8\xff\xe0fake-jpeg".to_vec(), "morel.jpg").unwrap()
}

/// Records the pid of every process it starts.
#[derive(Default)]
struct SpySpawner {
    pids: Mutex<Vec<u32>>,
}

impl ProcessSpawner for SpySpawner {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn WorkerProcess>> {
        let process = TokioSpawner.spawn(program, args)?;
        if let Some(pid) = process.id() {
            self.pids.lock().unwrap().push(pid);
        }
        Ok(process)
    }
}

fn is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn returns_trimmed_stdout_and_sends_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let captured = dir.path().join("request.json");
    let script = write_script(
        &dir,
        &format!(
            "cat > '{}'\necho '  {}  '\n",
            captured.display(),
            success_json("edible", 0.75)
        ),
    );
    let client = client_for(&script, 5_000);

    let raw = client.invoke(&request(), Duration::from_secs(5)).await.unwrap();
    assert_eq!(raw, success_json("edible", 0.75));

    let sent: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&captured).unwrap()).unwrap();
    assert_eq!(sent["image"], STANDARD.encode(request().image_payload()));
    assert_eq!(sent["model_path"], "/models/mushroom.pth");
}

#[tokio::test]
async fn stderr_is_not_mixed_into_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        &dir,
        &format!(
            "cat > /dev/null\necho 'UserWarning: torch is slow' >&2\necho '{}'\n",
            success_json("poisonous", 0.2)
        ),
    );
    let client = client_for(&script, 5_000);

    let raw = client.invoke(&request(), Duration::from_secs(5)).await.unwrap();
    assert!(!raw.contains("UserWarning"));
    assert_eq!(raw, success_json("poisonous", 0.2));
}

#[tokio::test]
async fn whitespace_only_output_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "cat > /dev/null\nprintf '  \\n\\n'\n");
    let client = client_for(&script, 5_000);

    let result = client.invoke(&request(), Duration::from_secs(5)).await;
    assert_eq!(result, Err(ClassificationFailure::EmptyOutput));
}

#[tokio::test]
async fn script_that_ignores_stdin_is_still_read() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, &format!("echo '{}'\n", success_json("edible", 0.6)));
    let client = client_for(&script, 5_000);

    let raw = client.invoke(&request(), Duration::from_secs(5)).await.unwrap();
    assert_eq!(raw, success_json("edible", 0.6));
}

#[tokio::test]
async fn hung_process_is_killed_at_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "exec sleep 10\n");
    let spy = Arc::new(SpySpawner::default());
    let config = PredictorConfig::new(&script, "/models/mushroom.pth").with_executable("sh");
    let client = InferenceProcessClient::with_spawner(config, spy.clone());

    let deadline = Duration::from_millis(300);
    let started = Instant::now();
    let result = client.invoke(&request(), deadline).await;

    assert_eq!(result, Err(ClassificationFailure::Timeout(deadline)));
    assert!(started.elapsed() < Duration::from_secs(5));

    let pids = spy.pids.lock().unwrap().clone();
    assert_eq!(pids.len(), 1);
    assert!(!is_alive(pids[0]));
}

#[tokio::test]
async fn missing_executable_is_a_launch_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "echo '{}'\n");
    let config = PredictorConfig::new(&script, "/models/mushroom.pth")
        .with_executable("/nonexistent/bin/python3");
    let client = InferenceProcessClient::new(config);

    let result = client.invoke(&request(), Duration::from_secs(5)).await;
    assert!(matches!(result, Err(ClassificationFailure::ProcessLaunch(_))));
}

#[tokio::test]
async fn one_process_per_request() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        &dir,
        &format!("cat > /dev/null\necho '{}'\n", success_json("edible", 0.9)),
    );
    let spy = Arc::new(SpySpawner::default());
    let config = PredictorConfig::new(&script, "/models/mushroom.pth").with_executable("sh");
    let client = InferenceProcessClient::with_spawner(config, spy.clone());

    let (req_a, req_b) = (request(), request());
    let (a, b) = tokio::join!(
        client.invoke(&req_a, Duration::from_secs(5)),
        client.invoke(&req_b, Duration::from_secs(5)),
    );
    assert!(a.is_ok() && b.is_ok());

    let pids = spy.pids.lock().unwrap().clone();
    assert_eq!(pids.len(), 2);
    assert_ne!(pids[0], pids[1]);
}

#[tokio::test]
async fn predictor_reported_failure_reaches_the_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        &dir,
        "cat > /dev/null\necho '{\"success\": false, \"error\": \"image too dark\"}'\n",
    );
    let client = client_for(&script, 5_000);
    let config = client.config().clone();

    let repo = MemoryRepository::new();
    let blob_dir = tempfile::tempdir().unwrap();
    let uploads = UploadService::new(
        Arc::new(repo.clone()),
        Arc::new(LocalStorage::new(blob_dir.path(), "http://localhost:8081")),
    );
    let orchestrator =
        ClassificationOrchestrator::new(Arc::new(client), Arc::new(repo.clone()), uploads, &config);

    let response = orchestrator.classify(b"img".to_vec(), "dark.jpg").await;
    assert!(!response.success);
    assert_eq!(response.message, "Prediction failed: image too dark");
    assert_eq!(repo.classification_count(), 0);
}

#[tokio::test]
async fn timed_out_upload_ends_failed_without_a_record() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "exec sleep 10\n");
    let client = client_for(&script, 300);
    let config = client.config().clone();

    let repo = MemoryRepository::new();
    let blob_dir = tempfile::tempdir().unwrap();
    let uploads = UploadService::new(
        Arc::new(repo.clone()),
        Arc::new(LocalStorage::new(blob_dir.path(), "http://localhost:8081")),
    );
    let orchestrator = ClassificationOrchestrator::new(
        Arc::new(client),
        Arc::new(repo.clone()),
        uploads.clone(),
        &config,
    );
    let upload = uploads
        .create_from_url(NewImageUpload {
            image_url: "https://example.com/slow.jpg".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let started = Instant::now();
    let response = orchestrator
        .classify_upload(upload.id, b"img".to_vec())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!response.success);
    assert_eq!(response.message, "ML prediction timed out after 300 ms");
    let stored = uploads.get(upload.id).await.unwrap();
    assert_eq!(stored.status(), UploadStatus::Failed);
    assert_eq!(stored.failure_reason(), Some(response.message.as_str()));
    assert_eq!(repo.classification_count(), 0);
}

#[tokio::test]
async fn chatty_stderr_before_reading_stdin_does_not_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        &dir,
        &format!(
            "head -c 262144 /dev/zero >&2\ncat > /dev/null\necho '{}'\n",
            success_json("edible", 0.8)
        ),
    );
    let client = client_for(&script, 5_000);
    let request = ClassificationRequest::new(vec![7u8; 256 * 1024], "large.jpg").unwrap();

    let started = Instant::now();
    let raw = client.invoke(&request, Duration::from_secs(5)).await.unwrap();

    assert_eq!(raw, success_json("edible", 0.8));
    assert!(started.elapsed() < Duration::from_secs(4));
}
