pub mod models;
pub mod upload_service;

pub use models::{ImageUpload, LifecycleError, NewImageUpload};
pub use upload_service::{UploadError, UploadService};
