use shared::ClassificationResponse;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::classification::models::{
    ClassificationFailure, ClassificationRecord, ClassificationRequest, NewClassification,
};
use crate::db::repository::ClassificationStore;
use crate::predictor::{ClassificationResultCodec, InferenceBackend, PredictorConfig};
use crate::upload::upload_service::{UploadError, UploadService};

pub const SUCCESS_MESSAGE: &str = "Classification completed and saved";

/// Runs one image through the predictor, persists successes and reports the
/// outcome as a response envelope. Holds no per-request state, so one
/// instance serves any number of concurrent requests.
#[derive(Clone)]
pub struct ClassificationOrchestrator {
    backend: Arc<dyn InferenceBackend>,
    codec: ClassificationResultCodec,
    store: Arc<dyn ClassificationStore>,
    uploads: UploadService,
    deadline: Duration,
}

impl ClassificationOrchestrator {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<dyn ClassificationStore>,
        uploads: UploadService,
        config: &PredictorConfig,
    ) -> Self {
        Self {
            backend,
            codec: ClassificationResultCodec::new(config.strict_decoding),
            store,
            uploads,
            deadline: config.deadline(),
        }
    }

    pub fn uploads(&self) -> &UploadService {
        &self.uploads
    }

    pub async fn classify(&self, image_payload: Vec<u8>, image_name: &str) -> ClassificationResponse {
        match self.run(image_payload, image_name, None).await {
            Ok(record) => succeeded(record),
            Err(failure) => ClassificationResponse::failed(failure.reason()),
        }
    }

    /// Classifies the image behind an existing upload and records the outcome
    /// on it. Uploads that already reached a terminal state are left alone.
    pub async fn classify_upload(
        &self,
        upload_id: Uuid,
        image_payload: Vec<u8>,
    ) -> Result<ClassificationResponse, UploadError> {
        let upload = self.uploads.mark_running(upload_id).await?;

        match self
            .run(image_payload, &upload.display_name(), Some(upload.image_url.clone()))
            .await
        {
            Ok(record) => match self.uploads.mark_predicted(upload_id, record.id).await {
                Ok(_) => Ok(succeeded(record)),
                Err(e) => Ok(self.abandon_record(upload_id, record, e).await),
            },
            Err(failure) => {
                let reason = failure.reason();
                self.uploads.mark_failed(upload_id, &reason).await?;
                Ok(ClassificationResponse::failed(reason))
            }
        }
    }

    /// Undoes a saved record whose upload could not be linked to it and marks
    /// the upload Failed, so neither is left half-finished.
    async fn abandon_record(
        &self,
        upload_id: Uuid,
        record: ClassificationRecord,
        cause: UploadError,
    ) -> ClassificationResponse {
        log::error!(
            "Failed to link classification {} to upload {}: {}",
            record.id,
            upload_id,
            cause
        );
        if let Err(e) = self.store.delete(record.id).await {
            log::error!("Orphaned classification {} could not be removed: {}", record.id, e);
        }

        let reason = ClassificationFailure::Persistence(cause.to_string()).reason();
        if let Err(e) = self.uploads.mark_failed(upload_id, &reason).await {
            log::error!("Upload {} could not be marked failed: {}", upload_id, e);
        }
        ClassificationResponse::failed(reason)
    }

    async fn run(
        &self,
        image_payload: Vec<u8>,
        image_name: &str,
        image_path: Option<String>,
    ) -> Result<ClassificationRecord, ClassificationFailure> {
        let result = self.predict(image_payload, image_name).await.inspect_err(|failure| {
            log::warn!("Classification of '{}' failed: {}", image_name, failure);
        })?;

        let record = self
            .store
            .save(NewClassification {
                image_name: image_name.to_string(),
                image_path,
                result,
            })
            .await
            .map_err(|e| {
                log::error!("Failed to save classification for '{}': {:?}", image_name, e);
                ClassificationFailure::Persistence(e.to_string())
            })?;

        log::info!(
            "Classified '{}' as {} ({:.3}), record {}",
            image_name,
            record.prediction,
            record.confidence,
            record.id
        );
        Ok(record)
    }

    async fn predict(
        &self,
        image_payload: Vec<u8>,
        image_name: &str,
    ) -> Result<shared::ClassificationResult, ClassificationFailure> {
        let request = ClassificationRequest::new(image_payload, image_name)?;
        let raw = self.backend.invoke(&request, self.deadline).await?;
        self.codec.decode(&raw).into_result()
    }
}

fn succeeded(record: ClassificationRecord) -> ClassificationResponse {
    ClassificationResponse::succeeded(SUCCESS_MESSAGE, record.to_result(), record.id)
}
