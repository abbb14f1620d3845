use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use shared::UploadStatus;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::classification::models::{ClassificationRecord, NewClassification};
use crate::db::repository::{ClassificationStore, ImageUploadStore, RepositoryError, newest_first};
use crate::upload::models::{ImageUpload, NewImageUpload, StoredLifecycle};

type Item = HashMap<String, AttributeValue>;

#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    classifications_table: String,
    images_table: String,
}

impl DynamoDbRepository {
    pub fn new(client: Client, classifications_table: String, images_table: String) -> Self {
        Self {
            client,
            classifications_table,
            images_table,
        }
    }

    async fn scan_all(
        &self,
        table: &str,
        filter: Option<(&str, &str, AttributeValue)>,
    ) -> Result<Vec<Item>, RepositoryError> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(table)
                .set_exclusive_start_key(start_key.take());
            if let Some((name, placeholder, value)) = &filter {
                request = request
                    .filter_expression(format!("#{} = {}", name, placeholder))
                    .expression_attribute_names(format!("#{}", name), name.to_string())
                    .expression_attribute_values(placeholder.to_string(), value.clone());
            }

            let result = request.send().await.map_err(|e| {
                log::error!("DynamoDB scan of '{}' failed: {:?}", table, e);
                RepositoryError::DynamoDb(e.to_string())
            })?;

            if let Some(page) = result.items {
                items.extend(page);
            }
            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn get_item(&self, table: &str, id: Uuid) -> Result<Option<Item>, RepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(table)
            .key("id", AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(result.item)
    }

    async fn delete_item(&self, table: &str, id: Uuid) -> Result<bool, RepositoryError> {
        let result = self
            .client
            .delete_item()
            .table_name(table)
            .key("id", AttributeValue::S(id.to_string()))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(result.attributes.is_some_and(|old| !old.is_empty()))
    }

    fn classification_to_item(record: &ClassificationRecord) -> Item {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(record.id.to_string()));
        item.insert(
            "image_name".to_string(),
            AttributeValue::S(record.image_name.clone()),
        );
        if let Some(image_path) = &record.image_path {
            item.insert(
                "image_path".to_string(),
                AttributeValue::S(image_path.clone()),
            );
        }
        item.insert(
            "prediction".to_string(),
            AttributeValue::S(record.prediction.clone()),
        );
        item.insert(
            "confidence".to_string(),
            AttributeValue::N(record.confidence.to_string()),
        );
        item.insert(
            "edible_probability".to_string(),
            AttributeValue::N(record.edible_probability.to_string()),
        );
        item.insert(
            "poisonous_probability".to_string(),
            AttributeValue::N(record.poisonous_probability.to_string()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(record.created_at.to_rfc3339()),
        );
        item
    }

    fn parse_classification_from_item(item: &Item) -> Result<ClassificationRecord, RepositoryError> {
        Ok(ClassificationRecord {
            id: required_uuid(item, "id")?,
            image_name: required_string(item, "image_name")?,
            image_path: optional_string(item, "image_path"),
            prediction: required_string(item, "prediction")?,
            confidence: required_number(item, "confidence")?,
            edible_probability: required_number(item, "edible_probability")?,
            poisonous_probability: required_number(item, "poisonous_probability")?,
            created_at: required_time(item, "created_at")?,
        })
    }

    fn upload_to_item(upload: &ImageUpload) -> Item {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(upload.id.to_string()));
        if let Some(uploader_id) = upload.uploader_id {
            item.insert(
                "uploader_id".to_string(),
                AttributeValue::S(uploader_id.to_string()),
            );
        }
        item.insert("source".to_string(), AttributeValue::S(upload.source.clone()));
        item.insert(
            "image_url".to_string(),
            AttributeValue::S(upload.image_url.clone()),
        );
        item.insert(
            "thumb_url".to_string(),
            AttributeValue::S(upload.thumb_url.clone()),
        );
        if let Some(name) = &upload.original_filename {
            item.insert(
                "original_filename".to_string(),
                AttributeValue::S(name.clone()),
            );
        }
        item.insert(
            "mime_type".to_string(),
            AttributeValue::S(upload.mime_type.clone()),
        );
        item.insert(
            "filesize".to_string(),
            AttributeValue::N(upload.filesize.to_string()),
        );
        if let Some(width) = upload.width {
            item.insert("width".to_string(), AttributeValue::N(width.to_string()));
        }
        if let Some(height) = upload.height {
            item.insert("height".to_string(), AttributeValue::N(height.to_string()));
        }
        if let Some(lat) = upload.gps_lat {
            item.insert("gps_lat".to_string(), AttributeValue::N(lat.to_string()));
        }
        if let Some(lon) = upload.gps_lon {
            item.insert("gps_lon".to_string(), AttributeValue::N(lon.to_string()));
        }
        if let Some(shot_at) = upload.shot_at {
            item.insert(
                "shot_at".to_string(),
                AttributeValue::S(shot_at.to_rfc3339()),
            );
        }
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(upload.created_at.to_rfc3339()),
        );
        item.insert(
            "updated_at".to_string(),
            AttributeValue::S(upload.updated_at.to_rfc3339()),
        );
        item.insert(
            "status".to_string(),
            AttributeValue::S(upload.status().to_string()),
        );
        if let Some(reason) = upload.failure_reason() {
            item.insert(
                "failure_reason".to_string(),
                AttributeValue::S(reason.to_string()),
            );
        }
        if let Some(classification_id) = upload.classification_id() {
            item.insert(
                "classification_id".to_string(),
                AttributeValue::S(classification_id.to_string()),
            );
        }
        item
    }

    fn parse_upload_from_item(item: &Item) -> Result<ImageUpload, RepositoryError> {
        let mut base = ImageUpload::new(NewImageUpload {
            image_url: required_string(item, "image_url")?,
            original_filename: optional_string(item, "original_filename"),
            uploader_id: optional_string(item, "uploader_id")
                .map(|s| parse_uuid("uploader_id", &s))
                .transpose()?,
            source: Some(required_string(item, "source")?),
            thumb_url: Some(required_string(item, "thumb_url")?),
            mime_type: Some(required_string(item, "mime_type")?),
            filesize: Some(required_number(item, "filesize")? as i64),
            width: optional_number(item, "width").map(|n| n as i32),
            height: optional_number(item, "height").map(|n| n as i32),
            gps_lat: optional_number(item, "gps_lat"),
            gps_lon: optional_number(item, "gps_lon"),
            shot_at: optional_string(item, "shot_at")
                .map(|s| parse_time("shot_at", &s))
                .transpose()?,
        });
        base.id = required_uuid(item, "id")?;
        base.created_at = required_time(item, "created_at")?;

        let status_str = required_string(item, "status")?;
        let status = UploadStatus::from_str(&status_str)
            .map_err(|_| RepositoryError::InvalidData(format!("Invalid status: {}", status_str)))?;
        let lifecycle = StoredLifecycle {
            status,
            failure_reason: optional_string(item, "failure_reason"),
            classification_id: optional_string(item, "classification_id")
                .map(|s| parse_uuid("classification_id", &s))
                .transpose()?,
            updated_at: required_time(item, "updated_at")?,
        };

        ImageUpload::restore(base, lifecycle).map_err(|e| RepositoryError::InvalidData(e.to_string()))
    }
}

fn required_string(item: &Item, key: &str) -> Result<String, RepositoryError> {
    optional_string(item, key)
        .ok_or_else(|| RepositoryError::InvalidData(format!("Missing {} attribute", key)))
}

fn optional_string(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn required_number(item: &Item, key: &str) -> Result<f64, RepositoryError> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<f64>().ok())
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {} attribute", key)))
}

fn optional_number(item: &Item, key: &str) -> Option<f64> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse::<f64>().ok())
}

fn parse_uuid(key: &str, raw: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(raw).map_err(|_| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

fn required_uuid(item: &Item, key: &str) -> Result<Uuid, RepositoryError> {
    parse_uuid(key, &required_string(item, key)?)
}

fn parse_time(key: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::InvalidData(format!("Invalid {}", key)))
}

fn required_time(item: &Item, key: &str) -> Result<DateTime<Utc>, RepositoryError> {
    parse_time(key, &required_string(item, key)?)
}

#[async_trait]
impl ClassificationStore for DynamoDbRepository {
    async fn save(&self, new: NewClassification) -> Result<ClassificationRecord, RepositoryError> {
        let record = new.into_record(Uuid::new_v4(), Utc::now());
        log::info!(
            "Saving classification {} to DynamoDB table '{}'",
            record.id,
            self.classifications_table
        );

        self.client
            .put_item()
            .table_name(&self.classifications_table)
            .set_item(Some(Self::classification_to_item(&record)))
            .send()
            .await
            .map_err(|e| {
                log::error!("DynamoDB put_item failed for classification {}: {:?}", record.id, e);
                RepositoryError::DynamoDb(e.to_string())
            })?;

        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClassificationRecord>, RepositoryError> {
        self.get_item(&self.classifications_table, id)
            .await?
            .map(|item| Self::parse_classification_from_item(&item))
            .transpose()
    }

    async fn find_all(&self) -> Result<Vec<ClassificationRecord>, RepositoryError> {
        let mut records = self
            .scan_all(&self.classifications_table, None)
            .await?
            .iter()
            .map(Self::parse_classification_from_item)
            .collect::<Result<Vec<_>, _>>()?;
        newest_first(&mut records);
        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.delete_item(&self.classifications_table, id).await
    }
}

#[async_trait]
impl ImageUploadStore for DynamoDbRepository {
    async fn insert_upload(&self, upload: &ImageUpload) -> Result<(), RepositoryError> {
        self.client
            .put_item()
            .table_name(&self.images_table)
            .set_item(Some(Self::upload_to_item(upload)))
            .send()
            .await
            .map_err(|e| {
                log::error!("DynamoDB put_item failed for upload {}: {:?}", upload.id, e);
                RepositoryError::DynamoDb(e.to_string())
            })?;
        Ok(())
    }

    async fn update_upload(
        &self,
        upload: &ImageUpload,
        expected: UploadStatus,
    ) -> Result<(), RepositoryError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.images_table)
            .set_item(Some(Self::upload_to_item(upload)))
            .condition_expression("attribute_exists(id) AND #status = :expected")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":expected", AttributeValue::S(expected.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception())
                {
                    // The condition covers both a missing row and a moved status.
                    return match self.get_item(&self.images_table, upload.id).await? {
                        Some(_) => Err(RepositoryError::StatusMismatch(expected)),
                        None => Err(RepositoryError::NotFound),
                    };
                }
                log::error!("DynamoDB update failed for upload {}: {:?}", upload.id, e);
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn find_upload(&self, id: Uuid) -> Result<Option<ImageUpload>, RepositoryError> {
        self.get_item(&self.images_table, id)
            .await?
            .map(|item| Self::parse_upload_from_item(&item))
            .transpose()
    }

    async fn list_uploads(&self, status: Option<UploadStatus>) -> Result<Vec<ImageUpload>, RepositoryError> {
        let filter = status.map(|s| ("status", ":status", AttributeValue::S(s.to_string())));
        let mut uploads = self
            .scan_all(&self.images_table, filter)
            .await?
            .iter()
            .map(Self::parse_upload_from_item)
            .collect::<Result<Vec<_>, _>>()?;
        uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(uploads)
    }

    async fn delete_upload(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.delete_item(&self.images_table, id).await
    }
}
