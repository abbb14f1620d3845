use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::UploadStatus;
use uuid::Uuid;

pub const DEFAULT_SOURCE: &str = "USER";
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Upload is already {0} and cannot be classified again")]
    Terminal(UploadStatus),
    #[error("Upload is already running")]
    AlreadyRunning,
    #[error("Upload moved out of {0} while it was being updated")]
    StatusChanged(UploadStatus),
    #[error("Failure reason must not be empty")]
    EmptyReason,
    #[error("Inconsistent upload state: {0}")]
    Inconsistent(String),
}

/// Fields supplied when an upload record is first created.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewImageUpload {
    pub image_url: String,
    pub original_filename: Option<String>,
    pub uploader_id: Option<Uuid>,
    pub source: Option<String>,
    pub thumb_url: Option<String>,
    pub mime_type: Option<String>,
    pub filesize: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub shot_at: Option<DateTime<Utc>>,
}

/// An uploaded image and where it stands in classification.
///
/// The lifecycle fields are private: `failure_reason` is present exactly when
/// the status is `Failed`, `classification_id` exactly when it is
/// `Predicted`, and nothing leaves a terminal state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageUpload {
    pub id: Uuid,
    pub uploader_id: Option<Uuid>,
    pub source: String,
    pub image_url: String,
    pub thumb_url: String,
    pub original_filename: Option<String>,
    pub mime_type: String,
    pub filesize: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub shot_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification_id: Option<Uuid>,
}

/// Lifecycle columns read back from storage.
#[derive(Debug, Clone)]
pub struct StoredLifecycle {
    pub status: UploadStatus,
    pub failure_reason: Option<String>,
    pub classification_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl ImageUpload {
    pub fn new(new: NewImageUpload) -> Self {
        let now = Utc::now();
        let thumb_url = new.thumb_url.unwrap_or_else(|| new.image_url.clone());
        Self {
            id: Uuid::new_v4(),
            uploader_id: new.uploader_id,
            source: new.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            image_url: new.image_url,
            thumb_url,
            original_filename: new.original_filename,
            mime_type: new.mime_type.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            filesize: new.filesize.unwrap_or(0),
            width: new.width,
            height: new.height,
            gps_lat: new.gps_lat,
            gps_lon: new.gps_lon,
            shot_at: new.shot_at,
            created_at: now,
            updated_at: now,
            status: UploadStatus::Pending,
            failure_reason: None,
            classification_id: None,
        }
    }

    /// Rebuilds an upload from persisted columns, rejecting rows whose
    /// lifecycle fields contradict each other.
    pub fn restore(mut base: ImageUpload, lifecycle: StoredLifecycle) -> Result<Self, LifecycleError> {
        let StoredLifecycle {
            status,
            failure_reason,
            classification_id,
            updated_at,
        } = lifecycle;

        if (status == UploadStatus::Failed) != failure_reason.is_some() {
            return Err(LifecycleError::Inconsistent(format!(
                "status {} with failure_reason {:?}",
                status, failure_reason
            )));
        }
        if (status == UploadStatus::Predicted) != classification_id.is_some() {
            return Err(LifecycleError::Inconsistent(format!(
                "status {} with classification_id {:?}",
                status, classification_id
            )));
        }

        base.status = status;
        base.failure_reason = failure_reason;
        base.classification_id = classification_id;
        base.updated_at = updated_at;
        Ok(base)
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn classification_id(&self) -> Option<Uuid> {
        self.classification_id
    }

    pub fn display_name(&self) -> String {
        self.original_filename
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    fn ensure_open(&self) -> Result<(), LifecycleError> {
        if self.status.is_terminal() {
            return Err(LifecycleError::Terminal(self.status));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn mark_running(&mut self) -> Result<(), LifecycleError> {
        self.ensure_open()?;
        if self.status == UploadStatus::Running {
            return Err(LifecycleError::AlreadyRunning);
        }
        self.status = UploadStatus::Running;
        self.touch();
        Ok(())
    }

    pub fn mark_predicted(&mut self, classification_id: Uuid) -> Result<(), LifecycleError> {
        self.ensure_open()?;
        self.status = UploadStatus::Predicted;
        self.classification_id = Some(classification_id);
        self.touch();
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), LifecycleError> {
        self.ensure_open()?;
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(LifecycleError::EmptyReason);
        }
        self.status = UploadStatus::Failed;
        self.failure_reason = Some(reason);
        self.touch();
        Ok(())
    }
}
