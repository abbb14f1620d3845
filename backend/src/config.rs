use std::path::PathBuf;

use crate::predictor::config::PredictorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Memory,
    DynamoDb {
        classifications_table: String,
        images_table: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlobBackend {
    Local {
        root: PathBuf,
        public_base_url: String,
    },
    S3 {
        bucket: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub predictor: PredictorConfig,
    pub storage: StorageBackend,
    pub blobs: BlobBackend,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw.clone(),
            })?,
            None => 8081,
        };

        let predictor = PredictorConfig::load(&lookup)?;

        let storage = match lookup("STORAGE_BACKEND").as_deref().map(str::trim) {
            None | Some("memory") => StorageBackend::Memory,
            Some("dynamodb") => StorageBackend::DynamoDb {
                classifications_table: lookup("DYNAMODB_CLASSIFICATIONS_TABLE")
                    .ok_or(ConfigError::Missing("DYNAMODB_CLASSIFICATIONS_TABLE"))?,
                images_table: lookup("DYNAMODB_IMAGES_TABLE")
                    .ok_or(ConfigError::Missing("DYNAMODB_IMAGES_TABLE"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let blobs = match lookup("BLOB_BACKEND").as_deref().map(str::trim) {
            None | Some("local") => BlobBackend::Local {
                root: lookup("LOCAL_STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./uploads")),
                public_base_url: lookup("PUBLIC_BASE_URL")
                    .unwrap_or_else(|| format!("http://localhost:{}", port)),
            },
            Some("s3") => BlobBackend::S3 {
                bucket: lookup("S3_BUCKET_NAME").ok_or(ConfigError::Missing("S3_BUCKET_NAME"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "BLOB_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            port,
            predictor,
            storage,
            blobs,
        })
    }

    pub fn needs_aws(&self) -> bool {
        matches!(self.storage, StorageBackend::DynamoDb { .. })
            || matches!(self.blobs, BlobBackend::S3 { .. })
    }
}
