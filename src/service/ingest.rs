//! Background ingest worker pool.
//!
//! A bounded `mpsc` queue feeds a fixed number of worker tasks. Asynchronous
//! uploads must reserve a queue slot before any row or file is created, so a
//! saturated queue rejects the upload with `Overloaded` and leaves no trace.
//! Enrichment jobs from the synchronous path queue with backpressure instead;
//! they are never dropped.

use log::{debug, error, info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, OwnedPermit};
use tokio::sync::Mutex;

use crate::error::ServiceError;
use crate::media::{self, audio_preview, image_preview, plan_conversion};
use crate::models::{Collection, ContentType, EntryCompletion, EntryStatus};
use crate::repository::Repository;
use crate::storage::FileStore;

/// Shared handles every pipeline step needs.
#[derive(Clone)]
pub struct PipelineContext {
    pub repo: Arc<dyn Repository>,
    pub store: Arc<FileStore>,
    pub transcoder: Arc<media::Transcoder>,
}

/// Full processing of a claimed asynchronous upload.
pub struct ProcessJob {
    pub collection: Collection,
    pub entry_id: i64,
    pub timestamp: i64,
    pub claimed_path: PathBuf,
    pub source_mime: String,
    pub filename: String,
}

/// Post-commit enrichment of an already stored entry.
pub struct EnrichJob {
    pub collection: Collection,
    pub entry_id: i64,
    pub timestamp: i64,
    pub mime_type: String,
}

pub enum Job {
    Process(ProcessJob),
    Preview(EnrichJob),
    Probe(EnrichJob),
}

/// A reserved queue slot, taken before the upload is claimed.
pub struct IngestPermit(OwnedPermit<Job>);

impl IngestPermit {
    pub fn send(self, job: Job) {
        self.0.send(job);
    }
}

#[derive(Clone)]
pub struct IngestPool {
    tx: mpsc::Sender<Job>,
}

impl IngestPool {
    /// Spawns the worker tasks. Must run inside a tokio runtime.
    pub fn start(ctx: PipelineContext, workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        for worker_id in 0..workers.max(1) {
            tokio::spawn(worker_loop(worker_id, ctx.clone(), rx.clone()));
        }
        info!(
            "Ingest pool started: {} workers, queue capacity {}",
            workers.max(1),
            queue_capacity.max(1)
        );
        Self { tx }
    }

    /// Reserves a slot without queueing anything yet.
    pub fn try_acquire(&self) -> Result<IngestPermit, ServiceError> {
        match self.tx.clone().try_reserve_owned() {
            Ok(permit) => Ok(IngestPermit(permit)),
            Err(TrySendError::Full(_)) => Err(ServiceError::Overloaded),
            Err(TrySendError::Closed(_)) => {
                Err(ServiceError::Internal("ingest pool is shut down".to_string()))
            }
        }
    }

    /// Queues an enrichment job, waiting for space if needed.
    pub async fn submit(&self, job: Job) -> Result<(), ServiceError> {
        self.tx
            .send(job)
            .await
            .map_err(|_| ServiceError::Internal("ingest pool is shut down".to_string()))
    }
}

async fn worker_loop(worker_id: usize, ctx: PipelineContext, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else { break };
        let job_ctx = ctx.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || run_job(&job_ctx, job)).await {
            error!("Ingest worker {}: job panicked: {}", worker_id, e);
        }
    }
    debug!("Ingest worker {} stopped", worker_id);
}

fn run_job(ctx: &PipelineContext, job: Job) {
    match job {
        Job::Process(job) => run_process_job(ctx, job),
        Job::Preview(job) => run_preview_job(ctx, job),
        Job::Probe(job) => run_probe_job(ctx, job),
    }
}

/// The full asynchronous pipeline (convert, preview, probe, move, finalize).
/// Any failure marks the entry `error` and leaves the row for diagnosis;
/// intermediate temp files are removed either way.
fn run_process_job(ctx: &PipelineContext, job: ProcessJob) {
    let mut scratch = vec![job.claimed_path.clone()];
    let result = process_pipeline(ctx, &job, &mut scratch);

    for path in scratch {
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Could not remove temp file {}: {}", path.display(), e);
            }
        }
    }

    if let Err(e) = result {
        error!(
            "Processing entry {} in '{}' failed: {}",
            job.entry_id, job.collection.name, e
        );
        if let Err(e) = ctx
            .repo
            .set_entry_status(&job.collection.name, job.entry_id, EntryStatus::Error)
        {
            error!(
                "Could not mark entry {} in '{}' as error: {}",
                job.entry_id, job.collection.name, e
            );
        }
    }
}

fn process_pipeline(
    ctx: &PipelineContext,
    job: &ProcessJob,
    scratch: &mut Vec<PathBuf>,
) -> Result<(), ServiceError> {
    let plan = plan_conversion(
        job.collection.content_type,
        &job.collection.config,
        &job.source_mime,
        &job.filename,
    );

    let (source, mime_type, filename) = match plan {
        Some(plan) => {
            let converted = ctx
                .store
                .temp_dir()
                .join(format!("convert-{}", job.entry_id));
            scratch.push(converted.clone());
            ctx.transcoder.convert_file(
                &job.claimed_path,
                &plan.transcoder_args,
                plan.transcoder_format,
                &converted,
            )?;
            (converted, plan.target_mime, plan.target_filename)
        }
        None => (
            job.claimed_path.clone(),
            job.source_mime.clone(),
            job.filename.clone(),
        ),
    };

    if job.collection.config.create_preview {
        write_preview(ctx, &job.collection, job.timestamp, job.entry_id, &source, &mime_type)?;
    }

    let tech = media::extract_tech_metadata(
        &ctx.transcoder,
        &source,
        &mime_type,
        job.collection.content_type,
    )?;

    let final_path = ctx
        .store
        .entry_path(&job.collection.name, job.timestamp, job.entry_id)?;
    fs::rename(&source, &final_path)?;
    let filesize = fs::metadata(&final_path)?.len() as i64;

    ctx.repo.finalize_entry(
        &job.collection.name,
        job.entry_id,
        &EntryCompletion {
            filesize,
            mime_type,
            filename,
            tech,
        },
    )?;
    info!(
        "Entry {} in '{}' processed ({} bytes)",
        job.entry_id, job.collection.name, filesize
    );
    Ok(())
}

/// Post-commit preview for a synchronously stored entry. The file is already
/// safe, so failure is logged and the entry still becomes `ready`.
fn run_preview_job(ctx: &PipelineContext, job: EnrichJob) {
    let result = (|| -> Result<(), ServiceError> {
        let source = ctx
            .store
            .entry_path(&job.collection.name, job.timestamp, job.entry_id)?;
        write_preview(
            ctx,
            &job.collection,
            job.timestamp,
            job.entry_id,
            &source,
            &job.mime_type,
        )
    })();
    if let Err(e) = result {
        warn!(
            "Preview for entry {} in '{}' failed: {}",
            job.entry_id, job.collection.name, e
        );
    }
    if let Err(e) = ctx
        .repo
        .set_entry_status(&job.collection.name, job.entry_id, EntryStatus::Ready)
    {
        error!(
            "Could not mark entry {} in '{}' as ready: {}",
            job.entry_id, job.collection.name, e
        );
    }
}

fn run_probe_job(ctx: &PipelineContext, job: EnrichJob) {
    let result = (|| -> Result<(), ServiceError> {
        let source = ctx
            .store
            .entry_path(&job.collection.name, job.timestamp, job.entry_id)?;
        let tech = media::extract_tech_metadata(
            &ctx.transcoder,
            &source,
            &job.mime_type,
            job.collection.content_type,
        )?;
        ctx.repo
            .update_tech_metadata(&job.collection.name, job.entry_id, &tech)
    })();
    if let Err(e) = result {
        warn!(
            "Metadata probe for entry {} in '{}' failed: {}",
            job.entry_id, job.collection.name, e
        );
    }
}

fn write_preview(
    ctx: &PipelineContext,
    collection: &Collection,
    timestamp: i64,
    entry_id: i64,
    source: &std::path::Path,
    mime_type: &str,
) -> Result<(), ServiceError> {
    let preview = ctx
        .store
        .preview_path(&collection.name, timestamp, entry_id)?;
    match collection.content_type {
        ContentType::Image => image_preview::create_image_preview(&ctx.transcoder, source, &preview),
        ContentType::Audio => {
            audio_preview::create_audio_preview(&ctx.transcoder, source, &preview, mime_type)
        }
        ContentType::File => Ok(()),
    }
}
