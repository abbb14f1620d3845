use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassificationRequest {
    pub image_data: String, // base64, optionally a data: URI
    pub image_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Probabilities {
    pub edible: f64,
    pub poisonous: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub prediction: String,
    pub confidence: f64,
    pub probabilities: Probabilities,
}

/// Envelope returned to HTTP callers for every classification attempt.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassificationResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

impl ClassificationResponse {
    pub fn succeeded(message: impl Into<String>, result: ClassificationResult, record_id: Uuid) -> Self {
        Self {
            success: true,
            message: message.into(),
            result: Some(result),
            record_id: Some(record_id),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            result: None,
            record_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum UploadStatus {
    #[default]
    Pending,
    Running,
    Predicted,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Predicted | UploadStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn upload_status_defaults_to_pending_and_parses_any_case() {
        assert_eq!(UploadStatus::default(), UploadStatus::Pending);
        assert_eq!(UploadStatus::from_str("predicted").unwrap(), UploadStatus::Predicted);
        assert_eq!(UploadStatus::Failed.to_string(), "FAILED");
        assert!(UploadStatus::from_str("done").is_err());
    }
}
