use async_trait::async_trait;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),
}

/// Somewhere uploaded image bytes can live behind a URL.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores the bytes and returns the URL the image is reachable at.
    async fn put(&self, data: &[u8], file_name: &str, mime_type: &str) -> Result<String, StorageError>;
}

pub fn calculate_image_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

pub fn extract_file_extension(mime_type: &str) -> Result<&'static str, StorageError> {
    match mime_type {
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/webp" => Ok("webp"),
        "image/gif" => Ok("gif"),
        "image/bmp" => Ok("bmp"),
        "image/tiff" => Ok("tiff"),
        other => Err(StorageError::InvalidFormat(other.to_string())),
    }
}

/// Content-addressed key: identical images land on the same object.
pub fn image_key(image_data: &[u8], mime_type: &str) -> Result<String, StorageError> {
    let extension = extract_file_extension(mime_type)?;
    Ok(format!("images/{}.{}", calculate_image_hash(image_data), extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_sha256_with_extension() {
        let key = image_key(b"abc", "image/png").unwrap();
        assert_eq!(
            key,
            "images/ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad.png"
        );
    }

    #[test]
    fn unknown_mime_type_is_rejected() {
        assert!(matches!(
            extract_file_extension("image/heic"),
            Err(StorageError::InvalidFormat(_))
        ));
        assert_eq!(extract_file_extension("image/jpeg").unwrap(), "jpg");
    }
}
