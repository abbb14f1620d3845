use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::storage::blob_storage::{BlobStorage, StorageError, image_key};

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String) -> Self {
        Self {
            client,
            bucket_name,
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("https://{}.s3.amazonaws.com/{}", self.bucket_name, key)
    }

    pub async fn upload_image(
        &self,
        image_data: &[u8],
        s3_key: &str,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from(image_data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(s3_key)
            .body(body)
            .content_type(mime_type)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStorage for S3Service {
    async fn put(&self, data: &[u8], file_name: &str, mime_type: &str) -> Result<String, StorageError> {
        let key = image_key(data, mime_type)?;
        log::info!("Uploading {} to s3://{}/{}", file_name, self.bucket_name, key);
        self.upload_image(data, &key, mime_type).await?;
        Ok(self.object_url(&key))
    }
}
