pub mod models;
pub mod orchestrator;

pub use models::{
    ClassificationFailure, ClassificationOutcome, ClassificationRecord, ClassificationRequest,
    NewClassification,
};
pub use orchestrator::ClassificationOrchestrator;
