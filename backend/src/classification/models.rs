use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{ClassificationResult, Probabilities};
use std::time::Duration;
use uuid::Uuid;

/// Every way a single classification attempt can end without a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassificationFailure {
    #[error("Invalid input: image payload is empty")]
    InvalidInput,
    #[error("ML prediction timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Empty response from predictor")]
    EmptyOutput,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("Prediction failed: {0}")]
    PredictorReportedFailure(String),
    #[error("Error running predictor: {0}")]
    ProcessLaunch(String),
    #[error("Failed to save classification: {0}")]
    Persistence(String),
}

impl ClassificationFailure {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// An image handed to the predictor. The payload is never empty.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    image_payload: Vec<u8>,
    image_name: String,
}

impl ClassificationRequest {
    pub fn new(
        image_payload: Vec<u8>,
        image_name: impl Into<String>,
    ) -> Result<Self, ClassificationFailure> {
        if image_payload.is_empty() {
            return Err(ClassificationFailure::InvalidInput);
        }
        Ok(Self {
            image_payload,
            image_name: image_name.into(),
        })
    }

    pub fn image_payload(&self) -> &[u8] {
        &self.image_payload
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    Success(ClassificationResult),
    Failure(ClassificationFailure),
}

impl ClassificationOutcome {
    pub fn into_result(self) -> Result<ClassificationResult, ClassificationFailure> {
        match self {
            ClassificationOutcome::Success(result) => Ok(result),
            ClassificationOutcome::Failure(failure) => Err(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ClassificationOutcome::Success(_))
    }
}

/// A successful classification waiting for the store to assign its id and
/// timestamp.
#[derive(Debug, Clone)]
pub struct NewClassification {
    pub image_name: String,
    pub image_path: Option<String>,
    pub result: ClassificationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationRecord {
    pub id: Uuid,
    pub image_name: String,
    pub image_path: Option<String>,
    pub prediction: String,
    pub confidence: f64,
    pub edible_probability: f64,
    pub poisonous_probability: f64,
    pub created_at: DateTime<Utc>,
}

impl NewClassification {
    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> ClassificationRecord {
        ClassificationRecord {
            id,
            image_name: self.image_name,
            image_path: self.image_path,
            prediction: self.result.prediction,
            confidence: self.result.confidence,
            edible_probability: self.result.probabilities.edible,
            poisonous_probability: self.result.probabilities.poisonous,
            created_at,
        }
    }
}

impl ClassificationRecord {
    pub fn to_result(&self) -> ClassificationResult {
        ClassificationResult {
            prediction: self.prediction.clone(),
            confidence: self.confidence,
            probabilities: Probabilities {
                edible: self.edible_probability,
                poisonous: self.poisonous_probability,
            },
        }
    }
}
