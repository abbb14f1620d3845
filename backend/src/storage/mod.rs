pub mod blob_storage;
pub mod local_storage;
pub mod s3_service;

pub use blob_storage::{BlobStorage, StorageError};
pub use local_storage::LocalStorage;
pub use s3_service::S3Service;
