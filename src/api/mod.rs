//! HTTP API
//!
//! Thin handlers: extract, delegate to the service layer, map the result.
//! All error mapping lives in `ServiceError`'s `ResponseError` impl.

use actix_web::http::header;
use actix_web::{delete, get, patch, post, web, HttpRequest, HttpResponse};
use bytes::BytesMut;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Write;
use tempfile::NamedTempFile;

use crate::app_state::AppState;
use crate::error::ServiceError;
use crate::housekeeping::tasks;
use crate::models::{BulkDeleteRequest, CollectionSpec, ServiceInfo, UserEntryPatch};
use crate::service::entry_service::{self, IngestOutcome, UploadPayload};
use crate::service::{collection_service, export};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(create_collection)
        .service(list_collections)
        .service(get_collection)
        .service(upload_entry)
        .service(list_entries)
        .service(get_entry)
        .service(patch_entry)
        .service(delete_entry)
        .service(delete_entries)
        .service(get_entry_file)
        .service(get_entry_preview)
        .service(trigger_housekeeping)
        .service(export_collection)
        .service(service_info)
        .service(health);
}

#[post("/api/collections")]
async fn create_collection(
    state: web::Data<AppState>,
    spec: web::Json<CollectionSpec>,
) -> Result<HttpResponse, ServiceError> {
    let collection = collection_service::create_collection(&state.ctx, spec.into_inner()).await?;
    Ok(HttpResponse::Created().json(collection))
}

#[get("/api/collections")]
async fn list_collections(state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    let collections = collection_service::list_collections(&state.ctx).await?;
    Ok(HttpResponse::Ok().json(collections))
}

#[get("/api/collections/{name}")]
async fn get_collection(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let collection = entry_service::get_collection(&state.ctx, &path).await?;
    Ok(HttpResponse::Ok().json(collection))
}

#[post("/api/collections/{name}/entries")]
async fn upload_entry(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
    mut body: web::Payload,
) -> Result<HttpResponse, ServiceError> {
    let collection = path.into_inner();
    log_mdc::insert("collection", collection.as_str());

    let mime_type = header_value(&req, header::CONTENT_TYPE.as_str())
        .map(|v| v.split(';').next().unwrap_or(&v).trim().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let filename = header_value(&req, "x-filename");
    let custom_fields: Map<String, Value> = match header_value(&req, "x-entry-metadata") {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            ServiceError::Validation(format!("X-Entry-Metadata is not a JSON object: {}", e))
        })?,
        None => Map::new(),
    };

    // Buffer small uploads; spool everything beyond the threshold to a
    // transport temp file for the asynchronous path.
    let threshold = state.config.server.max_sync_upload_bytes;
    let mut buffer = BytesMut::new();
    let mut spool: Option<(NamedTempFile, u64)> = None;
    while let Some(chunk) = body.next().await {
        let chunk =
            chunk.map_err(|e| ServiceError::Validation(format!("upload stream failed: {}", e)))?;
        match &mut spool {
            Some((file, size)) => {
                file.write_all(&chunk)?;
                *size += chunk.len() as u64;
            }
            None if buffer.len() + chunk.len() > threshold => {
                let mut file = NamedTempFile::new_in(state.ctx.store.temp_dir())?;
                file.write_all(&buffer)?;
                file.write_all(&chunk)?;
                let size = (buffer.len() + chunk.len()) as u64;
                buffer.clear();
                spool = Some((file, size));
            }
            None => buffer.extend_from_slice(&chunk),
        }
    }
    let payload = match spool {
        Some((file, size)) => UploadPayload::Spooled { file, size },
        None => UploadPayload::Buffered(buffer.freeze()),
    };

    let outcome = entry_service::ingest(
        &state.ctx,
        &state.pool,
        &collection,
        payload,
        mime_type,
        filename,
        custom_fields,
    )
    .await;
    log_mdc::remove("collection");

    match outcome? {
        IngestOutcome::Completed(entry) => Ok(HttpResponse::Created().json(entry)),
        IngestOutcome::Accepted(pending) => Ok(HttpResponse::Accepted().json(pending)),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[get("/api/collections/{name}/entries")]
async fn list_entries(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ServiceError> {
    let entries = entry_service::list_entries(
        &state.ctx,
        &path,
        query.limit.unwrap_or(100).clamp(1, 1000),
        query.offset.unwrap_or(0).max(0),
    )
    .await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[get("/api/collections/{name}/entries/{id}")]
async fn get_entry(
    state: web::Data<AppState>,
    path: web::Path<(String, i64)>,
) -> Result<HttpResponse, ServiceError> {
    let (name, id) = path.into_inner();
    let entry = entry_service::get_entry(&state.ctx, &name, id).await?;
    Ok(HttpResponse::Ok().json(entry))
}

#[patch("/api/collections/{name}/entries/{id}")]
async fn patch_entry(
    state: web::Data<AppState>,
    path: web::Path<(String, i64)>,
    patch: web::Json<UserEntryPatch>,
) -> Result<HttpResponse, ServiceError> {
    let (name, id) = path.into_inner();
    let entry = entry_service::patch_entry(&state.ctx, &name, id, patch.into_inner()).await?;
    Ok(HttpResponse::Ok().json(entry))
}

#[delete("/api/collections/{name}/entries/{id}")]
async fn delete_entry(
    state: web::Data<AppState>,
    path: web::Path<(String, i64)>,
) -> Result<HttpResponse, ServiceError> {
    let (name, id) = path.into_inner();
    entry_service::delete_entry(&state.ctx, &name, id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/collections/{name}/entries/delete")]
async fn delete_entries(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<BulkDeleteRequest>,
) -> Result<HttpResponse, ServiceError> {
    let report =
        entry_service::delete_entries(&state.ctx, &path, body.into_inner().ids).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/api/collections/{name}/entries/{id}/file")]
async fn get_entry_file(
    state: web::Data<AppState>,
    path: web::Path<(String, i64)>,
) -> Result<HttpResponse, ServiceError> {
    let (name, id) = path.into_inner();
    let (data, mime_type) = entry_service::entry_file(&state.ctx, &name, id).await?;
    Ok(HttpResponse::Ok().content_type(mime_type).body(data))
}

#[get("/api/collections/{name}/entries/{id}/preview")]
async fn get_entry_preview(
    state: web::Data<AppState>,
    path: web::Path<(String, i64)>,
) -> Result<HttpResponse, ServiceError> {
    let (name, id) = path.into_inner();
    let data = entry_service::entry_preview(&state.ctx, &name, id).await?;
    Ok(HttpResponse::Ok().content_type("image/jpeg").body(data))
}

#[post("/api/collections/{name}/housekeeping")]
async fn trigger_housekeeping(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let name = path.into_inner();
    let repo = state.ctx.repo.clone();
    let store = state.ctx.store.clone();
    let locks = state.locks.clone();
    let report =
        tokio::task::spawn_blocking(move || tasks::run_manual(&repo, &store, &locks, &name))
            .await
            .map_err(ServiceError::internal)??;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/api/collections/{name}/export")]
async fn export_collection(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let name = path.into_inner();
    let mut rx = export::export_collection(&state.ctx, &name).await?;
    let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
        .map(Ok::<_, actix_web::Error>);
    Ok(HttpResponse::Ok()
        .content_type("application/x-tar")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.tar\"", name),
        ))
        .streaming(stream))
}

#[get("/api/info")]
async fn service_info(state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(ServiceInfo {
        service_name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_since: state.started_at,
        ffmpeg: state.ctx.transcoder.has_ffmpeg(),
        ffprobe: state.ctx.transcoder.has_ffprobe(),
    }))
}

#[get("/api/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
