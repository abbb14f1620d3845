use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{ClassificationRequest, ClassificationResponse, UploadStatus};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::classification::orchestrator::ClassificationOrchestrator;
use crate::db::repository::{ClassificationStore, RepositoryError};
use crate::storage::blob_storage::StorageError;
use crate::upload::models::NewImageUpload;
use crate::upload::upload_service::{MAX_UPLOAD_BYTES, UploadError};

/// Base64 inflates by 4/3; leave headroom for the JSON wrapper.
const MAX_JSON_BYTES: usize = MAX_UPLOAD_BYTES / 3 * 4 + 64 * 1024;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_body(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse {
        error: message.into(),
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: Option<PathBuf>) {
    cfg.service(
        web::scope("/api/classifications")
            .app_data(json_config())
            .service(web::resource("").route(web::get().to(list_classifications)))
            .service(web::resource("/classify").route(web::post().to(classify)))
            .service(web::resource("/classify-file").route(web::post().to(classify_file)))
            .service(web::resource("/date-range").route(web::get().to(classifications_between)))
            .service(
                web::resource("/prediction/{prediction}")
                    .route(web::get().to(classifications_by_prediction)),
            )
            .service(
                web::resource("/confidence/{min}").route(web::get().to(classifications_by_confidence)),
            )
            .service(
                web::resource("/stats/count/{prediction}").route(web::get().to(count_by_prediction)),
            )
            .service(
                web::resource("/stats/confidence/{prediction}")
                    .route(web::get().to(average_confidence)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(get_classification))
                    .route(web::delete().to(delete_classification)),
            ),
    )
    .service(
        web::scope("/api/images")
            .app_data(json_config())
            .service(
                web::resource("")
                    .route(web::post().to(upload_image))
                    .route(web::get().to(list_images)),
            )
            .service(web::resource("/url").route(web::post().to(create_image_from_url)))
            .service(web::resource("/{id}/prediction").route(web::get().to(get_image_prediction)))
            .service(
                web::resource("/{id}")
                    .route(web::get().to(get_image))
                    .route(web::delete().to(delete_image)),
            ),
    );

    if let Some(dir) = static_dir {
        cfg.service(Files::new("/static", dir));
    }
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_JSON_BYTES)
        .error_handler(|err, _req| {
            let response = HttpResponse::BadRequest().json(error_body(err.to_string()));
            actix_web::error::InternalError::from_response(err, response).into()
        })
}

fn parse_id(raw: &str) -> Result<Uuid, HttpResponse> {
    Uuid::parse_str(raw).map_err(|_| HttpResponse::BadRequest().json(error_body("Invalid UUID format")))
}

fn envelope_response(envelope: &ClassificationResponse) -> HttpResponse {
    if envelope.success {
        HttpResponse::Ok().json(envelope)
    } else {
        HttpResponse::BadRequest().json(envelope)
    }
}

fn repository_error_response(e: &RepositoryError) -> HttpResponse {
    error!("Repository error: {:?}", e);
    match e {
        RepositoryError::NotFound => HttpResponse::NotFound().json(error_body(e.to_string())),
        _ => HttpResponse::InternalServerError().json(error_body(e.to_string())),
    }
}

fn upload_error_response(e: &UploadError) -> HttpResponse {
    let body = error_body(e.to_string());
    match e {
        UploadError::EmptyFile | UploadError::MissingUrl => HttpResponse::BadRequest().json(body),
        UploadError::TooLarge => HttpResponse::PayloadTooLarge().json(body),
        UploadError::UnsupportedMediaType(_) | UploadError::Storage(StorageError::InvalidFormat(_)) => {
            HttpResponse::UnsupportedMediaType().json(body)
        }
        UploadError::NotFound(_) => HttpResponse::NotFound().json(body),
        UploadError::Lifecycle(_) => HttpResponse::Conflict().json(body),
        UploadError::Repository(_) | UploadError::Storage(_) => {
            error!("Upload failed: {:?}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Strips an optional `data:<mime>;base64,` prefix before decoding.
pub fn decode_image_data(image_data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = match image_data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, data)| data),
        None => image_data,
    };
    STANDARD.decode(encoded.trim())
}

struct FilePart {
    data: Vec<u8>,
    file_name: Option<String>,
    mime_type: Option<String>,
    truncated: bool,
}

/// Reads the multipart field named `file`. Bytes past the upload limit are
/// dropped and the part is flagged `truncated`.
async fn read_file_field(payload: &mut Multipart) -> Result<Option<FilePart>, Error> {
    let mut part = None;

    while let Some(mut field) = payload.try_next().await? {
        if part.is_some() || field.name() != Some("file") {
            while field.try_next().await?.is_some() {}
            continue;
        }

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);
        let mime_type = field.content_type().map(|m| m.essence_str().to_string());

        let mut data = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = field.try_next().await? {
            let room = MAX_UPLOAD_BYTES.saturating_sub(data.len());
            if chunk.len() > room {
                truncated = true;
            }
            data.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }

        part = Some(FilePart {
            data,
            file_name,
            mime_type,
            truncated,
        });
    }

    Ok(part)
}

async fn classify(
    orchestrator: web::Data<ClassificationOrchestrator>,
    request: web::Json<ClassificationRequest>,
) -> HttpResponse {
    let request = request.into_inner();
    let image = match decode_image_data(&request.image_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Rejected classify request for '{}': {}", request.image_name, e);
            return HttpResponse::BadRequest().json(error_body("Invalid base64 image data"));
        }
    };

    let envelope = orchestrator.classify(image, &request.image_name).await;
    envelope_response(&envelope)
}

async fn classify_file(
    orchestrator: web::Data<ClassificationOrchestrator>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let Some(part) = read_file_field(&mut payload).await? else {
        return Ok(HttpResponse::BadRequest().json(error_body("Missing multipart field 'file'")));
    };
    if part.truncated {
        return Ok(upload_error_response(&UploadError::TooLarge));
    }

    let name = part.file_name.unwrap_or_else(|| "upload".to_string());
    let envelope = orchestrator.classify(part.data, &name).await;
    Ok(envelope_response(&envelope))
}

async fn list_classifications(store: web::Data<dyn ClassificationStore>) -> HttpResponse {
    match store.find_all().await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => repository_error_response(&e),
    }
}

async fn get_classification(
    store: web::Data<dyn ClassificationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match store.find_by_id(id).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => HttpResponse::NotFound().json(error_body("Classification not found")),
        Err(e) => repository_error_response(&e),
    }
}

async fn delete_classification(
    store: web::Data<dyn ClassificationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match store.delete(id).await {
        Ok(true) => {
            info!("Deleted classification {}", id);
            HttpResponse::NoContent().finish()
        }
        Ok(false) => HttpResponse::NotFound().json(error_body("Classification not found")),
        Err(e) => repository_error_response(&e),
    }
}

async fn classifications_by_prediction(
    store: web::Data<dyn ClassificationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    match store.find_by_prediction(&path.into_inner()).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => repository_error_response(&e),
    }
}

#[derive(Deserialize)]
struct DateRangeQuery {
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

async fn classifications_between(
    store: web::Data<dyn ClassificationStore>,
    query: web::Query<DateRangeQuery>,
) -> HttpResponse {
    let DateRangeQuery {
        start_date,
        end_date,
    } = query.into_inner();
    if start_date > end_date {
        return HttpResponse::BadRequest().json(error_body("start_date must not be after end_date"));
    }
    match store.find_created_between(start_date, end_date).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => repository_error_response(&e),
    }
}

async fn classifications_by_confidence(
    store: web::Data<dyn ClassificationStore>,
    path: web::Path<f64>,
) -> HttpResponse {
    match store.find_by_min_confidence(path.into_inner()).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => repository_error_response(&e),
    }
}

async fn count_by_prediction(
    store: web::Data<dyn ClassificationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let prediction = path.into_inner();
    match store.count_by_prediction(&prediction).await {
        Ok(count) => HttpResponse::Ok().json(json!({ "prediction": prediction, "count": count })),
        Err(e) => repository_error_response(&e),
    }
}

async fn average_confidence(
    store: web::Data<dyn ClassificationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let prediction = path.into_inner();
    match store.average_confidence_by_prediction(&prediction).await {
        Ok(average) => HttpResponse::Ok().json(json!({
            "prediction": prediction,
            "average_confidence": average,
        })),
        Err(e) => repository_error_response(&e),
    }
}

#[derive(Deserialize)]
struct UploadQuery {
    uploader_id: Option<Uuid>,
}

async fn upload_image(
    orchestrator: web::Data<ClassificationOrchestrator>,
    query: web::Query<UploadQuery>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let Some(part) = read_file_field(&mut payload).await? else {
        return Ok(HttpResponse::BadRequest().json(error_body("Missing multipart field 'file'")));
    };
    if part.truncated {
        return Ok(upload_error_response(&UploadError::TooLarge));
    }
    let mime_type = part
        .mime_type
        .unwrap_or_else(|| crate::upload::models::DEFAULT_MIME_TYPE.to_string());

    let uploads = orchestrator.uploads();
    let upload = match uploads
        .create_from_bytes(&part.data, part.file_name, &mime_type, query.uploader_id)
        .await
    {
        Ok(upload) => upload,
        Err(e) => return Ok(upload_error_response(&e)),
    };

    let envelope = match orchestrator.classify_upload(upload.id, part.data).await {
        Ok(envelope) => envelope,
        Err(e) => return Ok(upload_error_response(&e)),
    };
    let upload = match uploads.get(upload.id).await {
        Ok(upload) => upload,
        Err(e) => return Ok(upload_error_response(&e)),
    };

    let body = json!({ "upload": upload, "classification": envelope });
    Ok(if envelope.success {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::BadRequest().json(body)
    })
}

async fn create_image_from_url(
    orchestrator: web::Data<ClassificationOrchestrator>,
    new: web::Json<NewImageUpload>,
) -> HttpResponse {
    match orchestrator.uploads().create_from_url(new.into_inner()).await {
        Ok(upload) => HttpResponse::Created().json(upload),
        Err(e) => upload_error_response(&e),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list_images(
    orchestrator: web::Data<ClassificationOrchestrator>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let status = match query.status.as_deref().map(UploadStatus::from_str).transpose() {
        Ok(status) => status,
        Err(_) => return HttpResponse::BadRequest().json(error_body("Unknown upload status")),
    };
    match orchestrator.uploads().list(status).await {
        Ok(uploads) => HttpResponse::Ok().json(uploads),
        Err(e) => upload_error_response(&e),
    }
}

async fn get_image(
    orchestrator: web::Data<ClassificationOrchestrator>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match orchestrator.uploads().get(id).await {
        Ok(upload) => HttpResponse::Ok().json(upload),
        Err(e) => upload_error_response(&e),
    }
}

async fn get_image_prediction(
    orchestrator: web::Data<ClassificationOrchestrator>,
    store: web::Data<dyn ClassificationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let upload = match orchestrator.uploads().get(id).await {
        Ok(upload) => upload,
        Err(e) => return upload_error_response(&e),
    };
    let Some(classification_id) = upload.classification_id() else {
        return HttpResponse::NotFound().json(error_body("Prediction not ready"));
    };
    match store.find_by_id(classification_id).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => HttpResponse::NotFound().json(error_body("Classification not found")),
        Err(e) => repository_error_response(&e),
    }
}

async fn delete_image(
    orchestrator: web::Data<ClassificationOrchestrator>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = match parse_id(&path.into_inner()) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match orchestrator.uploads().delete(id).await {
        Ok(()) => {
            info!("Deleted upload {}", id);
            HttpResponse::NoContent().finish()
        }
        Err(e) => upload_error_response(&e),
    }
}
