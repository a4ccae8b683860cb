//! Bulk export of a collection as a streamed tar archive.
//!
//! The archive is built on a blocking task and pushed through a bounded
//! channel; when the client disconnects the channel closes and the builder
//! stops at the next between-files checkpoint.

use bytes::Bytes;
use log::{info, warn};
use std::fs::File;
use std::io::{self, Write};
use tokio::sync::mpsc;

use super::blocking;
use super::ingest::PipelineContext;
use crate::error::ServiceError;
use crate::models::{Collection, EntryStatus};

const PAGE_SIZE: i64 = 100;

/// Starts the export and returns the byte stream. The collection is looked
/// up first so an unknown name fails with 404 before any bytes flow.
pub async fn export_collection(
    ctx: &PipelineContext,
    name: &str,
) -> Result<mpsc::Receiver<Bytes>, ServiceError> {
    let repo = ctx.repo.clone();
    let lookup = name.to_string();
    let collection = blocking(move || repo.get_collection(&lookup)).await?;

    let (tx, rx) = mpsc::channel(8);
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = build_archive(&ctx, &collection, &tx) {
            warn!("Export of '{}' failed: {}", collection.name, e);
        }
    });
    Ok(rx)
}

fn build_archive(
    ctx: &PipelineContext,
    collection: &Collection,
    tx: &mpsc::Sender<Bytes>,
) -> Result<(), ServiceError> {
    let mut builder = tar::Builder::new(ChannelWriter { tx: tx.clone() });
    let mut offset = 0;
    let mut exported = 0u64;

    loop {
        let page = ctx.repo.list_entries(&collection.name, PAGE_SIZE, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as i64;

        for entry in page {
            // Cancellation point: a dropped receiver means the client went
            // away, stop between files instead of finishing the archive.
            if tx.is_closed() {
                info!("Export of '{}' cancelled by client", collection.name);
                return Ok(());
            }
            if entry.status != EntryStatus::Ready {
                continue;
            }
            let path = ctx
                .store
                .entry_path(&collection.name, entry.timestamp, entry.id)?;
            let mut file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(
                        "Skipping entry {} in export of '{}': {}",
                        entry.id, collection.name, e
                    );
                    continue;
                }
            };
            let archived_name = format!("{}_{}", entry.id, entry.filename);
            match builder.append_file(&archived_name, &mut file) {
                Ok(()) => exported += 1,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
                Err(e) => return Err(ServiceError::internal(e)),
            }
        }
    }

    match builder.finish() {
        Ok(()) => {
            info!("Exported {} entries from '{}'", exported, collection.name);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(ServiceError::internal(e)),
    }
}

struct ChannelWriter {
    tx: mpsc::Sender<Bytes>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "export consumer gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
