//! Metadata Repository
//!
//! Persistence seam for collections and entries. The trait keeps the
//! service and housekeeping layers testable against an in-memory mock;
//! production uses the SQLite store.

pub mod mock_store;
pub mod sqlite_store;

pub use mock_store::MockRepository;
pub use sqlite_store::SqliteRepository;

use serde_json::{Map, Value};

use crate::error::ServiceError;
use crate::models::{
    Collection, CollectionStats, Entry, EntryCompletion, EntryStatus, NewEntry, TechMetadata,
};

/// Minimal projection returned by bulk deletion so callers can remove the
/// files after the rows are gone.
#[derive(Debug, Clone, Copy)]
pub struct DeletedEntryMeta {
    pub id: i64,
    pub timestamp: i64,
    pub filesize: i64,
}

/// Write callback invoked mid-transaction by [`Repository::create_entry_with_file`].
/// Receives the freshly assigned entry id and its timestamp, writes the
/// file, and returns the stored size in bytes. An error rolls the row back.
pub type EntryFileWriter<'a> = dyn FnMut(i64, i64) -> Result<u64, ServiceError> + 'a;

pub trait Repository: Send + Sync {
    // -- collections --

    fn create_collection(&self, collection: &Collection) -> Result<(), ServiceError>;
    fn get_collection(&self, name: &str) -> Result<Collection, ServiceError>;
    fn list_collections(&self) -> Result<Vec<Collection>, ServiceError>;
    fn collection_stats(&self, name: &str) -> Result<CollectionStats, ServiceError>;
    fn update_last_eviction_run(&self, name: &str, timestamp: i64) -> Result<(), ServiceError>;

    // -- entries --

    /// Inserts a finished entry and writes its file inside one transaction.
    /// The row, the stats update and the file commit or roll back together.
    fn create_entry_with_file(
        &self,
        collection: &Collection,
        new: &NewEntry,
        write: &mut EntryFileWriter,
    ) -> Result<Entry, ServiceError>;

    /// Inserts a `processing` placeholder row for the asynchronous pipeline.
    fn create_processing_entry(
        &self,
        collection: &Collection,
        new: &NewEntry,
    ) -> Result<Entry, ServiceError>;

    /// Promotes a processing entry to `ready` with its final file facts.
    fn finalize_entry(
        &self,
        collection: &str,
        id: i64,
        completion: &EntryCompletion,
    ) -> Result<(), ServiceError>;

    fn set_entry_status(
        &self,
        collection: &str,
        id: i64,
        status: EntryStatus,
    ) -> Result<(), ServiceError>;

    fn update_tech_metadata(
        &self,
        collection: &str,
        id: i64,
        tech: &TechMetadata,
    ) -> Result<(), ServiceError>;

    /// Applies the user-editable projection: filename and schema-validated
    /// custom fields. Null values clear a custom field.
    fn apply_user_patch(
        &self,
        collection: &str,
        id: i64,
        filename: Option<&str>,
        custom_fields: &Map<String, Value>,
    ) -> Result<Entry, ServiceError>;

    fn get_entry(&self, collection: &str, id: i64) -> Result<Entry, ServiceError>;

    fn list_entries(
        &self,
        collection: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, ServiceError>;

    /// Removes the row and decrements the collection stats. Returns the
    /// freed filesize so callers can account without a prior read.
    fn delete_entry(&self, collection: &str, id: i64) -> Result<i64, ServiceError>;

    /// Removes every listed row in one transaction, decrementing the stats
    /// by what was actually found. Unknown ids are skipped, not an error.
    /// Returns the metadata of the deleted rows for file cleanup.
    fn delete_entries(
        &self,
        collection: &str,
        ids: &[i64],
    ) -> Result<Vec<DeletedEntryMeta>, ServiceError>;

    // -- eviction support --

    /// Settled entries older than the cutoff, oldest first. Entries still
    /// `processing` are never eviction candidates.
    fn entries_older_than(&self, collection: &str, cutoff: i64)
        -> Result<Vec<Entry>, ServiceError>;

    /// Oldest settled entries, for quota-phase batching.
    fn oldest_entries(&self, collection: &str, limit: i64) -> Result<Vec<Entry>, ServiceError>;

    // -- recovery --

    /// Marks every `processing` entry as `error`. Run once at startup to
    /// settle rows orphaned by a crash.
    fn fix_zombie_entries(&self) -> Result<u64, ServiceError>;
}
