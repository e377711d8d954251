use actix_multipart::Multipart;
use actix_web::web::Bytes;
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use log::debug;
use serde::Serialize;
use shared::{BackendKind, ImageUrlRequest};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::auth::extractor::AuthenticatedUser;
use crate::auth::routes::login;
use crate::error::PipelineError;
use crate::pipeline::{ImageSource, InferencePipeline};
use crate::quota::QuotaTracker;

const UPLOAD_FIELD: &str = "file";

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    message: &'static str,
    backends: BTreeMap<String, &'static str>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        PipelineError::InvalidRequest(format!("Invalid JSON body: {}", err)).into()
    }))
    .service(web::resource("/").route(web::get().to(index)))
    .service(web::resource("/health").route(web::get().to(health)))
    .service(web::resource("/login").route(web::post().to(login)))
    .service(web::resource("/quota").route(web::get().to(quota)))
    .service(web::resource("/user/quota").route(web::get().to(quota)))
    .service(web::resource("/infer/{backend}/upload").route(web::post().to(infer_upload)))
    .service(web::resource("/infer/{backend}/url").route(web::post().to(infer_url)));
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(MessageResponse {
        message: "Welcome to Chart-to-Text API",
    })
}

async fn health(pipeline: web::Data<InferencePipeline>) -> HttpResponse {
    let backends = pipeline
        .backend_states()
        .into_iter()
        .map(|(kind, state)| (kind.to_string(), state.as_str()))
        .collect();
    HttpResponse::Ok().json(HealthResponse {
        message: "Chart-to-Text API is running!",
        backends,
    })
}

async fn quota(user: AuthenticatedUser, quota: web::Data<QuotaTracker>) -> HttpResponse {
    let AuthenticatedUser(claims) = user;
    HttpResponse::Ok().json(quota.peek(&claims.sub, claims.role))
}

fn parse_backend(raw: &str) -> Result<BackendKind, PipelineError> {
    BackendKind::from_str(raw).map_err(|_| PipelineError::UnknownBackend(raw.to_string()))
}

async fn infer_upload(
    user: AuthenticatedUser,
    path: web::Path<String>,
    payload: Multipart,
    pipeline: web::Data<InferencePipeline>,
) -> Result<HttpResponse, PipelineError> {
    let AuthenticatedUser(claims) = user;
    let kind = parse_backend(&path)?;
    let bytes = read_upload(payload, pipeline.max_image_bytes()).await?;

    let response = pipeline
        .run(&claims, kind, ImageSource::Upload(bytes))
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn infer_url(
    user: AuthenticatedUser,
    path: web::Path<String>,
    body: web::Json<ImageUrlRequest>,
    pipeline: web::Data<InferencePipeline>,
) -> Result<HttpResponse, PipelineError> {
    let AuthenticatedUser(claims) = user;
    let kind = parse_backend(&path)?;
    let ImageUrlRequest { image_url } = body.into_inner();

    let response = pipeline
        .run(&claims, kind, ImageSource::Url(image_url))
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Reads the uploaded file out of a multipart body.
///
/// Takes the field named `file`, or failing that the first field that carries
/// a filename. At most `max_bytes + 1` bytes are kept, which is enough for the
/// acquirer to reject an oversized image. Callers are authenticated first.
async fn read_upload(mut payload: Multipart, max_bytes: usize) -> Result<Bytes, PipelineError> {
    let malformed =
        |e: actix_multipart::MultipartError| PipelineError::InvalidRequest(format!("Invalid multipart body: {}", e));
    let mut fallback: Option<Vec<u8>> = None;

    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        let is_file_field = field.name() == Some(UPLOAD_FIELD);
        let has_filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .is_some();
        if !is_file_field && (!has_filename || fallback.is_some()) {
            continue;
        }

        let mut image_data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(malformed)? {
            let room = max_bytes.saturating_add(1).saturating_sub(image_data.len());
            image_data.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if image_data.len() > max_bytes {
                break;
            }
        }
        debug!("Read {} bytes from multipart field", image_data.len());

        if is_file_field {
            return Ok(Bytes::from(image_data));
        }
        fallback = Some(image_data);
    }

    fallback
        .map(Bytes::from)
        .ok_or_else(|| PipelineError::InvalidRequest(format!("Missing '{}' field", UPLOAD_FIELD)))
}
