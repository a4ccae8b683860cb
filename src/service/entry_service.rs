//! Entry operations: upload routing, retrieval, edits and deletion.
//!
//! Uploads fork into two paths. Fully buffered payloads are processed
//! synchronously: the row, the (possibly converted) file and the stats
//! commit together, and the finished record is returned. Spooled payloads
//! are claimed, recorded as `processing` and handed to the worker pool; the
//! caller polls the returned id.

use bytes::Bytes;
use chrono::Utc;
use log::{info, warn};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tempfile::NamedTempFile;

use super::ingest::{EnrichJob, IngestPool, Job, PipelineContext, ProcessJob};
use super::blocking;
use crate::error::ServiceError;
use crate::media::planner::{extension_for_mime, ConversionPlan};
use crate::media::{image_preview, plan_conversion};
use crate::models::{
    BulkDeleteReport, Collection, ContentType, Entry, EntryStatus, NewEntry, PendingEntry,
    UserEntryPatch,
};
use crate::util::format_bytes;

/// An upload body as the transport delivered it.
pub enum UploadPayload {
    Buffered(Bytes),
    Spooled { file: NamedTempFile, size: u64 },
}

pub enum IngestOutcome {
    /// Fully processed; respond 201 with the finished record.
    Completed(Box<Entry>),
    /// Queued for background processing; respond 202 with the poll target.
    Accepted(PendingEntry),
}

pub async fn ingest(
    ctx: &PipelineContext,
    pool: &IngestPool,
    collection_name: &str,
    payload: UploadPayload,
    mime_type: String,
    filename: Option<String>,
    custom_fields: Map<String, Value>,
) -> Result<IngestOutcome, ServiceError> {
    let collection = get_collection(ctx, collection_name).await?;

    if !collection.content_type.permits_mime(&mime_type) {
        return Err(ServiceError::Unsupported(format!(
            "{} is not allowed in an {} collection",
            mime_type,
            collection.content_type.as_str()
        )));
    }
    collection.validate_custom_fields(&custom_fields)?;

    let filename =
        filename.unwrap_or_else(|| format!("upload.{}", extension_for_mime(&mime_type)));

    match payload {
        UploadPayload::Buffered(bytes) => {
            ingest_sync(ctx, pool, collection, bytes, mime_type, filename, custom_fields)
                .await
                .map(|entry| IngestOutcome::Completed(Box::new(entry)))
        }
        UploadPayload::Spooled { file, size } => {
            ingest_async(ctx, pool, collection, file, size, mime_type, filename, custom_fields)
                .await
                .map(IngestOutcome::Accepted)
        }
    }
}

async fn ingest_sync(
    ctx: &PipelineContext,
    pool: &IngestPool,
    collection: Collection,
    bytes: Bytes,
    mime_type: String,
    filename: String,
    custom_fields: Map<String, Value>,
) -> Result<Entry, ServiceError> {
    let timestamp = Utc::now().timestamp();
    let plan = plan_conversion(
        collection.content_type,
        &collection.config,
        &mime_type,
        &filename,
    );
    let (mime_type, filename) = match &plan {
        Some(plan) => (plan.target_mime.clone(), plan.target_filename.clone()),
        None => (mime_type, filename),
    };

    // Preview and probing run after the response; the row starts out
    // `processing` only when a preview will flip it to `ready` later.
    let status = if collection.config.create_preview {
        EntryStatus::Processing
    } else {
        EntryStatus::Ready
    };
    let new = NewEntry {
        timestamp,
        filename,
        mime_type,
        status,
        custom_fields,
    };

    let write_ctx = ctx.clone();
    let write_collection = collection.clone();
    let entry = blocking(move || {
        write_ctx
            .repo
            .create_entry_with_file(&write_collection, &new, &mut |id, ts| {
                let path = write_ctx.store.entry_path(&write_collection.name, ts, id)?;
                let written = write_upload(&write_ctx, plan.as_ref(), &bytes, &path);
                if written.is_err() {
                    let _ = fs::remove_file(&path);
                }
                written
            })
    })
    .await?;

    if collection.config.create_preview {
        pool.submit(Job::Preview(EnrichJob {
            collection: collection.clone(),
            entry_id: entry.id,
            timestamp,
            mime_type: entry.mime_type.clone(),
        }))
        .await?;
    }
    if collection.content_type != ContentType::File {
        pool.submit(Job::Probe(EnrichJob {
            collection,
            entry_id: entry.id,
            timestamp,
            mime_type: entry.mime_type.clone(),
        }))
        .await?;
    }

    info!("Stored entry {} ({} bytes)", entry.id, entry.filesize);
    Ok(entry)
}

/// Writes the upload to its permanent path, converting on the way when the
/// plan calls for it. Audio conversion needs the external transcoder;
/// image-to-JPEG falls back to an in-process re-encode.
fn write_upload(
    ctx: &PipelineContext,
    plan: Option<&ConversionPlan>,
    bytes: &Bytes,
    path: &Path,
) -> Result<u64, ServiceError> {
    let Some(plan) = plan else {
        return Ok(ctx.store.save_bytes(bytes, path)?);
    };

    if ctx.transcoder.has_ffmpeg() {
        ctx.transcoder
            .convert_bytes(bytes, &plan.transcoder_args, plan.transcoder_format, path)?;
        return Ok(fs::metadata(path)?.len());
    }
    if plan.target_mime == "image/jpeg" {
        let jpeg = image_preview::convert_to_jpeg(bytes)?;
        return Ok(ctx.store.save_bytes(&jpeg, path)?);
    }
    Err(ServiceError::DependencyUnavailable(format!(
        "conversion to {} requires ffmpeg",
        plan.target_mime
    )))
}

#[allow(clippy::too_many_arguments)]
async fn ingest_async(
    ctx: &PipelineContext,
    pool: &IngestPool,
    collection: Collection,
    transport_file: NamedTempFile,
    size: u64,
    mime_type: String,
    filename: String,
    custom_fields: Map<String, Value>,
) -> Result<PendingEntry, ServiceError> {
    // Reserve the worker slot first: a full queue must reject the upload
    // before any file is claimed or row written.
    let permit = pool.try_acquire()?;

    // Claim the transport's temp file: rename it onto a path this process
    // owns, so the transport's cleanup cannot take it away mid-pipeline.
    let claimed_path = tempfile::Builder::new()
        .prefix("claim-")
        .tempfile_in(ctx.store.temp_dir())
        .map_err(ServiceError::internal)?
        .into_temp_path()
        .keep()
        .map_err(ServiceError::internal)?;
    if let Err(e) = transport_file.persist(&claimed_path) {
        let _ = fs::remove_file(&claimed_path);
        return Err(ServiceError::internal(e.error));
    }

    let timestamp = Utc::now().timestamp();
    let new = NewEntry {
        timestamp,
        filename: filename.clone(),
        mime_type: mime_type.clone(),
        status: EntryStatus::Processing,
        custom_fields: custom_fields.clone(),
    };
    let insert_ctx = ctx.clone();
    let insert_collection = collection.clone();
    let entry = match blocking(move || {
        insert_ctx
            .repo
            .create_processing_entry(&insert_collection, &new)
    })
    .await
    {
        Ok(entry) => entry,
        Err(e) => {
            let _ = fs::remove_file(&claimed_path);
            return Err(e);
        }
    };

    info!(
        "Accepted entry {} in '{}' for background processing ({} bytes)",
        entry.id, collection.name, size
    );
    let name = collection.name.clone();
    permit.send(Job::Process(ProcessJob {
        collection,
        entry_id: entry.id,
        timestamp,
        claimed_path,
        source_mime: mime_type,
        filename,
    }));

    Ok(PendingEntry {
        id: entry.id,
        timestamp,
        collection: name,
        status: EntryStatus::Processing,
        custom_fields,
    })
}

pub async fn get_collection(
    ctx: &PipelineContext,
    name: &str,
) -> Result<Collection, ServiceError> {
    let repo = ctx.repo.clone();
    let name = name.to_string();
    blocking(move || repo.get_collection(&name)).await
}

pub async fn get_entry(
    ctx: &PipelineContext,
    collection: &str,
    id: i64,
) -> Result<Entry, ServiceError> {
    let repo = ctx.repo.clone();
    let collection = collection.to_string();
    blocking(move || repo.get_entry(&collection, id)).await
}

pub async fn list_entries(
    ctx: &PipelineContext,
    collection: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Entry>, ServiceError> {
    let repo = ctx.repo.clone();
    let collection = collection.to_string();
    blocking(move || {
        repo.get_collection(&collection)?;
        repo.list_entries(&collection, limit, offset)
    })
    .await
}

/// Applies a user edit. The payload type itself is the guard: only filename
/// and custom fields exist on it, and unknown keys land in the custom-field
/// map where schema validation rejects them.
pub async fn patch_entry(
    ctx: &PipelineContext,
    collection: &str,
    id: i64,
    patch: UserEntryPatch,
) -> Result<Entry, ServiceError> {
    let repo = ctx.repo.clone();
    let collection = collection.to_string();
    blocking(move || {
        let col = repo.get_collection(&collection)?;
        col.validate_custom_fields(&patch.custom_fields)?;
        repo.apply_user_patch(&collection, id, patch.filename.as_deref(), &patch.custom_fields)
    })
    .await
}

/// Deletes the row first, then best-effort removes the files. A file left
/// behind is logged; a row left behind would corrupt the stats.
pub async fn delete_entry(
    ctx: &PipelineContext,
    collection: &str,
    id: i64,
) -> Result<(), ServiceError> {
    let ctx = ctx.clone();
    let collection = collection.to_string();
    blocking(move || {
        let entry = ctx.repo.get_entry(&collection, id)?;
        ctx.repo.delete_entry(&collection, id)?;
        if let Err(e) = ctx
            .store
            .delete_entry_file(&collection, entry.timestamp, id)
        {
            warn!("Entry {} file cleanup failed: {}", id, e);
        }
        if let Err(e) = ctx
            .store
            .delete_preview_file(&collection, entry.timestamp, id)
        {
            warn!("Entry {} preview cleanup failed: {}", id, e);
        }
        info!("Deleted entry {} from '{}'", id, collection);
        Ok(())
    })
    .await
}

/// Bulk deletion: every found row goes in one transaction (unknown ids are
/// skipped), then file cleanup runs in the background so the response does
/// not wait on the filesystem.
pub async fn delete_entries(
    ctx: &PipelineContext,
    collection: &str,
    ids: Vec<i64>,
) -> Result<BulkDeleteReport, ServiceError> {
    if ids.is_empty() {
        return Err(ServiceError::Validation(
            "no entry ids provided".to_string(),
        ));
    }

    let delete_ctx = ctx.clone();
    let name = collection.to_string();
    let deleted = blocking(move || {
        delete_ctx.repo.get_collection(&name)?;
        delete_ctx.repo.delete_entries(&name, &ids)
    })
    .await?;

    let entries_deleted = deleted.len() as u64;
    let bytes_freed: u64 = deleted.iter().map(|meta| meta.filesize.max(0) as u64).sum();

    let cleanup_ctx = ctx.clone();
    let cleanup_name = collection.to_string();
    tokio::task::spawn_blocking(move || {
        for meta in deleted {
            if let Err(e) =
                cleanup_ctx
                    .store
                    .delete_entry_file(&cleanup_name, meta.timestamp, meta.id)
            {
                warn!("Entry {} file cleanup failed: {}", meta.id, e);
            }
            if let Err(e) =
                cleanup_ctx
                    .store
                    .delete_preview_file(&cleanup_name, meta.timestamp, meta.id)
            {
                warn!("Entry {} preview cleanup failed: {}", meta.id, e);
            }
        }
    });

    info!(
        "Bulk deleted {} entries from '{}'",
        entries_deleted, collection
    );
    Ok(BulkDeleteReport {
        collection: collection.to_string(),
        entries_deleted,
        bytes_freed,
        message: format!(
            "Deleted {} entries, freeing {}.",
            entries_deleted,
            format_bytes(bytes_freed)
        ),
    })
}

/// Reads back the stored file of a ready entry.
pub async fn entry_file(
    ctx: &PipelineContext,
    collection: &str,
    id: i64,
) -> Result<(Vec<u8>, String), ServiceError> {
    let ctx = ctx.clone();
    let collection = collection.to_string();
    blocking(move || {
        let entry = ctx.repo.get_entry(&collection, id)?;
        if entry.status != EntryStatus::Ready {
            return Err(ServiceError::NotFound(format!(
                "entry {} is {} and has no stored file",
                id,
                entry.status.as_str()
            )));
        }
        let path = ctx.store.entry_path(&collection, entry.timestamp, id)?;
        Ok((fs::read(path)?, entry.mime_type))
    })
    .await
}

/// Reads back the preview, if one was generated.
pub async fn entry_preview(
    ctx: &PipelineContext,
    collection: &str,
    id: i64,
) -> Result<Vec<u8>, ServiceError> {
    let ctx = ctx.clone();
    let collection = collection.to_string();
    blocking(move || {
        let entry = ctx.repo.get_entry(&collection, id)?;
        let path = ctx.store.preview_path(&collection, entry.timestamp, id)?;
        fs::read(&path).map_err(|_| {
            ServiceError::NotFound(format!("entry {} has no preview", id))
        })
    })
    .await
}
