use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use std::path::PathBuf;
use std::sync::Arc;

use mushroomvision::classification::ClassificationOrchestrator;
use mushroomvision::config::{AppConfig, BlobBackend, StorageBackend};
use mushroomvision::db::{ClassificationStore, DynamoDbRepository, ImageUploadStore, MemoryRepository};
use mushroomvision::predictor::{InferenceBackend, InferenceProcessClient};
use mushroomvision::routes::configure_routes;
use mushroomvision::storage::{BlobStorage, LocalStorage, S3Service};
use mushroomvision::upload::UploadService;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    if !config.predictor.predictor_script_path.exists() {
        log::warn!(
            "Predictor script {} does not exist; classifications will fail",
            config.predictor.predictor_script_path.display()
        );
    }

    let aws_config = if config.needs_aws() {
        Some(aws_config::defaults(BehaviorVersion::latest()).load().await)
    } else {
        None
    };

    let (classifications, uploads): (Arc<dyn ClassificationStore>, Arc<dyn ImageUploadStore>) =
        match (&config.storage, &aws_config) {
            (
                StorageBackend::DynamoDb {
                    classifications_table,
                    images_table,
                },
                Some(aws),
            ) => {
                log::info!(
                    "Using DynamoDB tables '{}' and '{}'",
                    classifications_table,
                    images_table
                );
                let repo = Arc::new(DynamoDbRepository::new(
                    DynamoDbClient::new(aws),
                    classifications_table.clone(),
                    images_table.clone(),
                ));
                let classifications: Arc<dyn ClassificationStore> = repo.clone();
                let uploads: Arc<dyn ImageUploadStore> = repo;
                (classifications, uploads)
            }
            _ => {
                log::info!("Using in-memory storage; records are lost on restart");
                let repo = Arc::new(MemoryRepository::new());
                let classifications: Arc<dyn ClassificationStore> = repo.clone();
                let uploads: Arc<dyn ImageUploadStore> = repo;
                (classifications, uploads)
            }
        };

    let mut static_dir: Option<PathBuf> = None;
    let blobs: Arc<dyn BlobStorage> = match (&config.blobs, &aws_config) {
        (BlobBackend::S3 { bucket }, Some(aws)) => {
            log::info!("Storing images in S3 bucket '{}'", bucket);
            Arc::new(S3Service::new(S3Client::new(aws), bucket.clone()))
        }
        (BlobBackend::Local { root, public_base_url }, _) => {
            std::fs::create_dir_all(root)?;
            log::info!("Storing images under {}", root.display());
            static_dir = Some(root.clone());
            Arc::new(LocalStorage::new(root.clone(), public_base_url.clone()))
        }
        (BlobBackend::S3 { .. }, None) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "S3 blob storage requires AWS configuration",
            ));
        }
    };

    let backend: Arc<dyn InferenceBackend> =
        Arc::new(InferenceProcessClient::new(config.predictor.clone()));
    let upload_service = UploadService::new(uploads, blobs);
    let orchestrator = web::Data::new(ClassificationOrchestrator::new(
        backend,
        classifications.clone(),
        upload_service,
        &config.predictor,
    ));
    let store: web::Data<dyn ClassificationStore> = web::Data::from(classifications);

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!(
        "Starting server on {} (predictor: {} {}, timeout {} ms)",
        bind_address,
        config.predictor.inference_executable,
        config.predictor.predictor_script_path.display(),
        config.predictor.process_timeout_ms
    );

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(orchestrator.clone())
            .app_data(store.clone())
            .configure(|cfg| configure_routes(cfg, static_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
