//! SQLite-backed repository.
//!
//! Single connection behind a mutex; every multi-step mutation runs in one
//! transaction so entry rows, files and collection stats never drift apart.

use log::info;
use rusqlite::{params, Connection, Transaction};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Mutex;

use super::{DeletedEntryMeta, EntryFileWriter, Repository};
use crate::error::ServiceError;
use crate::models::{
    Collection, CollectionConfig, CollectionStats, ContentType, CustomField, Entry,
    EntryCompletion, EntryStatus, NewEntry, RetentionPolicy, TechMetadata,
};

const ENTRY_COLUMNS: &str = "id, timestamp, filesize, filename, mime_type, status, \
     width, height, duration_sec, channels, custom_fields";

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, ServiceError> {
        let conn = Connection::open(db_path)?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, ServiceError> {
        let conn = Connection::open_in_memory()?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS collections (
                name                    TEXT PRIMARY KEY,
                content_type            TEXT NOT NULL,
                config                  TEXT NOT NULL,
                retention_interval      TEXT NOT NULL,
                retention_max_age       TEXT NOT NULL,
                retention_max_disk      TEXT NOT NULL,
                custom_fields           TEXT NOT NULL,
                entry_count             INTEGER NOT NULL DEFAULT 0,
                total_disk_space_bytes  INTEGER NOT NULL DEFAULT 0,
                last_eviction_run       INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS entries (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                collection    TEXT NOT NULL REFERENCES collections(name),
                timestamp     INTEGER NOT NULL,
                filesize      INTEGER NOT NULL DEFAULT 0,
                filename      TEXT NOT NULL,
                mime_type     TEXT NOT NULL,
                status        TEXT NOT NULL,
                width         INTEGER NOT NULL DEFAULT 0,
                height        INTEGER NOT NULL DEFAULT 0,
                duration_sec  REAL NOT NULL DEFAULT 0,
                channels      INTEGER NOT NULL DEFAULT 0,
                custom_fields TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_entries_collection_time
                ON entries (collection, timestamp);",
        )?;
        info!("Database schema initialized");
        Ok(())
    }
}

fn map_entry(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    let status: String = row.get(5)?;
    let custom_json: String = row.get(10)?;
    let status = EntryStatus::parse(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Entry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        filesize: row.get(2)?,
        filename: row.get(3)?,
        mime_type: row.get(4)?,
        status,
        width: row.get(6)?,
        height: row.get(7)?,
        duration_sec: row.get(8)?,
        channels: row.get(9)?,
        custom_fields: serde_json::from_str(&custom_json).unwrap_or_default(),
    })
}

fn map_collection(row: &rusqlite::Row) -> rusqlite::Result<Collection> {
    let content_type: String = row.get(1)?;
    let config_json: String = row.get(2)?;
    let fields_json: String = row.get(6)?;

    let content_type = match content_type.as_str() {
        "image" => ContentType::Image,
        "audio" => ContentType::Audio,
        _ => ContentType::File,
    };
    let config: CollectionConfig = serde_json::from_str(&config_json).unwrap_or_default();
    let custom_fields: Vec<CustomField> = serde_json::from_str(&fields_json).unwrap_or_default();

    Ok(Collection {
        name: row.get(0)?,
        content_type,
        config,
        retention: RetentionPolicy {
            interval: row.get(3)?,
            max_age: row.get(4)?,
            max_disk_space: row.get(5)?,
        },
        custom_fields,
        stats: CollectionStats {
            entry_count: row.get(7)?,
            total_disk_space_bytes: row.get(8)?,
        },
        last_eviction_run: row.get(9)?,
    })
}

fn insert_entry_row(
    tx: &Transaction,
    collection: &str,
    new: &NewEntry,
) -> Result<i64, ServiceError> {
    let custom_json =
        serde_json::to_string(&new.custom_fields).map_err(ServiceError::internal)?;
    tx.execute(
        "INSERT INTO entries (collection, timestamp, filename, mime_type, status, custom_fields)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            collection,
            new.timestamp,
            new.filename,
            new.mime_type,
            new.status.as_str(),
            custom_json,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn require_row_changed(changed: usize, collection: &str, id: i64) -> Result<(), ServiceError> {
    if changed == 0 {
        return Err(ServiceError::NotFound(format!(
            "entry {} in collection '{}'",
            id, collection
        )));
    }
    Ok(())
}

impl Repository for SqliteRepository {
    fn create_collection(&self, collection: &Collection) -> Result<(), ServiceError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM collections WHERE name = ?1",
                params![collection.name],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if exists.is_some() {
            return Err(ServiceError::Conflict(format!(
                "collection '{}' already exists",
                collection.name
            )));
        }

        let config_json =
            serde_json::to_string(&collection.config).map_err(ServiceError::internal)?;
        let fields_json =
            serde_json::to_string(&collection.custom_fields).map_err(ServiceError::internal)?;
        tx.execute(
            "INSERT INTO collections
                 (name, content_type, config, retention_interval, retention_max_age,
                  retention_max_disk, custom_fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                collection.name,
                collection.content_type.as_str(),
                config_json,
                collection.retention.interval,
                collection.retention.max_age,
                collection.retention.max_disk_space,
                fields_json,
            ],
        )?;
        tx.commit()?;
        info!("Created collection '{}'", collection.name);
        Ok(())
    }

    fn get_collection(&self, name: &str) -> Result<Collection, ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT name, content_type, config, retention_interval, retention_max_age,
                    retention_max_disk, custom_fields, entry_count, total_disk_space_bytes,
                    last_eviction_run
             FROM collections WHERE name = ?1",
            params![name],
            map_collection,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ServiceError::NotFound(format!("collection '{}'", name))
            }
            other => other.into(),
        })
    }

    fn list_collections(&self) -> Result<Vec<Collection>, ServiceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name, content_type, config, retention_interval, retention_max_age,
                    retention_max_disk, custom_fields, entry_count, total_disk_space_bytes,
                    last_eviction_run
             FROM collections ORDER BY name",
        )?;
        let rows = stmt.query_map([], map_collection)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn collection_stats(&self, name: &str) -> Result<CollectionStats, ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT entry_count, total_disk_space_bytes FROM collections WHERE name = ?1",
            params![name],
            |row| {
                Ok(CollectionStats {
                    entry_count: row.get(0)?,
                    total_disk_space_bytes: row.get(1)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ServiceError::NotFound(format!("collection '{}'", name))
            }
            other => other.into(),
        })
    }

    fn update_last_eviction_run(&self, name: &str, timestamp: i64) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE collections SET last_eviction_run = ?1 WHERE name = ?2",
            params![timestamp, name],
        )?;
        Ok(())
    }

    fn create_entry_with_file(
        &self,
        collection: &Collection,
        new: &NewEntry,
        write: &mut EntryFileWriter,
    ) -> Result<Entry, ServiceError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let id = insert_entry_row(&tx, &collection.name, new)?;

        // Write the file while the transaction is open; dropping the
        // transaction on error removes the row again.
        let filesize = write(id, new.timestamp)? as i64;

        tx.execute(
            "UPDATE entries SET filesize = ?1 WHERE id = ?2",
            params![filesize, id],
        )?;
        tx.execute(
            "UPDATE collections
             SET entry_count = entry_count + 1,
                 total_disk_space_bytes = total_disk_space_bytes + ?1
             WHERE name = ?2",
            params![filesize, collection.name],
        )?;
        tx.commit()?;

        Ok(Entry {
            id,
            timestamp: new.timestamp,
            filesize,
            filename: new.filename.clone(),
            mime_type: new.mime_type.clone(),
            status: new.status,
            width: 0,
            height: 0,
            duration_sec: 0.0,
            channels: 0,
            custom_fields: new.custom_fields.clone(),
        })
    }

    fn create_processing_entry(
        &self,
        collection: &Collection,
        new: &NewEntry,
    ) -> Result<Entry, ServiceError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let id = insert_entry_row(&tx, &collection.name, new)?;
        tx.execute(
            "UPDATE collections SET entry_count = entry_count + 1 WHERE name = ?1",
            params![collection.name],
        )?;
        tx.commit()?;

        Ok(Entry {
            id,
            timestamp: new.timestamp,
            filesize: 0,
            filename: new.filename.clone(),
            mime_type: new.mime_type.clone(),
            status: new.status,
            width: 0,
            height: 0,
            duration_sec: 0.0,
            channels: 0,
            custom_fields: new.custom_fields.clone(),
        })
    }

    fn finalize_entry(
        &self,
        collection: &str,
        id: i64,
        completion: &EntryCompletion,
    ) -> Result<(), ServiceError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE entries
             SET filesize = ?1, mime_type = ?2, filename = ?3, status = 'ready',
                 width = ?4, height = ?5, duration_sec = ?6, channels = ?7
             WHERE id = ?8 AND collection = ?9",
            params![
                completion.filesize,
                completion.mime_type,
                completion.filename,
                completion.tech.width,
                completion.tech.height,
                completion.tech.duration_sec,
                completion.tech.channels,
                id,
                collection,
            ],
        )?;
        require_row_changed(changed, collection, id)?;
        tx.execute(
            "UPDATE collections
             SET total_disk_space_bytes = total_disk_space_bytes + ?1
             WHERE name = ?2",
            params![completion.filesize, collection],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn set_entry_status(
        &self,
        collection: &str,
        id: i64,
        status: EntryStatus,
    ) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE entries SET status = ?1 WHERE id = ?2 AND collection = ?3",
            params![status.as_str(), id, collection],
        )?;
        require_row_changed(changed, collection, id)
    }

    fn update_tech_metadata(
        &self,
        collection: &str,
        id: i64,
        tech: &TechMetadata,
    ) -> Result<(), ServiceError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE entries
             SET width = ?1, height = ?2, duration_sec = ?3, channels = ?4
             WHERE id = ?5 AND collection = ?6",
            params![
                tech.width,
                tech.height,
                tech.duration_sec,
                tech.channels,
                id,
                collection,
            ],
        )?;
        require_row_changed(changed, collection, id)
    }

    fn apply_user_patch(
        &self,
        collection: &str,
        id: i64,
        filename: Option<&str>,
        custom_fields: &Map<String, Value>,
    ) -> Result<Entry, ServiceError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut entry = tx
            .query_row(
                &format!(
                    "SELECT {} FROM entries WHERE id = ?1 AND collection = ?2",
                    ENTRY_COLUMNS
                ),
                params![id, collection],
                map_entry,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => ServiceError::NotFound(format!(
                    "entry {} in collection '{}'",
                    id, collection
                )),
                other => other.into(),
            })?;

        if let Some(name) = filename {
            entry.filename = name.to_string();
        }
        for (key, value) in custom_fields {
            if value.is_null() {
                entry.custom_fields.remove(key);
            } else {
                entry.custom_fields.insert(key.clone(), value.clone());
            }
        }

        let custom_json =
            serde_json::to_string(&entry.custom_fields).map_err(ServiceError::internal)?;
        tx.execute(
            "UPDATE entries SET filename = ?1, custom_fields = ?2
             WHERE id = ?3 AND collection = ?4",
            params![entry.filename, custom_json, id, collection],
        )?;
        tx.commit()?;
        Ok(entry)
    }

    fn get_entry(&self, collection: &str, id: i64) -> Result<Entry, ServiceError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "SELECT {} FROM entries WHERE id = ?1 AND collection = ?2",
                ENTRY_COLUMNS
            ),
            params![id, collection],
            map_entry,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ServiceError::NotFound(format!("entry {} in collection '{}'", id, collection))
            }
            other => other.into(),
        })
    }

    fn list_entries(
        &self,
        collection: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, ServiceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entries WHERE collection = ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![collection, limit, offset], map_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn delete_entry(&self, collection: &str, id: i64) -> Result<i64, ServiceError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let filesize: i64 = tx
            .query_row(
                "SELECT filesize FROM entries WHERE id = ?1 AND collection = ?2",
                params![id, collection],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => ServiceError::NotFound(format!(
                    "entry {} in collection '{}'",
                    id, collection
                )),
                other => other.into(),
            })?;

        tx.execute(
            "DELETE FROM entries WHERE id = ?1 AND collection = ?2",
            params![id, collection],
        )?;
        tx.execute(
            "UPDATE collections
             SET entry_count = entry_count - 1,
                 total_disk_space_bytes = total_disk_space_bytes - ?1
             WHERE name = ?2",
            params![filesize, collection],
        )?;
        tx.commit()?;
        Ok(filesize)
    }

    fn delete_entries(
        &self,
        collection: &str,
        ids: &[i64],
    ) -> Result<Vec<DeletedEntryMeta>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        // Fetch what actually exists first; the delete and the stats
        // decrement are then computed from the found rows only.
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut found = Vec::new();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT id, timestamp, filesize FROM entries
                 WHERE collection = ? AND id IN ({})",
                placeholders
            ))?;
            let mut args: Vec<rusqlite::types::Value> = Vec::with_capacity(ids.len() + 1);
            args.push(collection.to_string().into());
            args.extend(ids.iter().map(|id| rusqlite::types::Value::from(*id)));
            let rows = stmt.query_map(rusqlite::params_from_iter(args), |row| {
                Ok(DeletedEntryMeta {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    filesize: row.get(2)?,
                })
            })?;
            for row in rows {
                found.push(row?);
            }
        }
        if found.is_empty() {
            return Ok(Vec::new());
        }

        let total: i64 = found.iter().map(|meta| meta.filesize).sum();
        let placeholders = vec!["?"; found.len()].join(", ");
        let mut args: Vec<rusqlite::types::Value> = Vec::with_capacity(found.len() + 1);
        args.push(collection.to_string().into());
        args.extend(found.iter().map(|meta| rusqlite::types::Value::from(meta.id)));
        tx.execute(
            &format!(
                "DELETE FROM entries WHERE collection = ? AND id IN ({})",
                placeholders
            ),
            rusqlite::params_from_iter(args),
        )?;
        tx.execute(
            "UPDATE collections
             SET entry_count = entry_count - ?1,
                 total_disk_space_bytes = total_disk_space_bytes - ?2
             WHERE name = ?3",
            params![found.len() as i64, total, collection],
        )?;
        tx.commit()?;
        Ok(found)
    }

    fn entries_older_than(
        &self,
        collection: &str,
        cutoff: i64,
    ) -> Result<Vec<Entry>, ServiceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entries
             WHERE collection = ?1 AND timestamp < ?2 AND status != 'processing'
             ORDER BY timestamp ASC, id ASC",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![collection, cutoff], map_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn oldest_entries(&self, collection: &str, limit: i64) -> Result<Vec<Entry>, ServiceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entries
             WHERE collection = ?1 AND status != 'processing'
             ORDER BY timestamp ASC, id ASC LIMIT ?2",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![collection, limit], map_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn fix_zombie_entries(&self) -> Result<u64, ServiceError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE entries SET status = 'error' WHERE status = 'processing'",
            [],
        )?;
        Ok(changed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectionConfig, CustomFieldKind};
    use serde_json::json;

    fn test_collection(name: &str) -> Collection {
        Collection {
            name: name.to_string(),
            content_type: ContentType::File,
            config: CollectionConfig::default(),
            retention: RetentionPolicy::default(),
            custom_fields: vec![CustomField {
                name: "note".to_string(),
                kind: CustomFieldKind::Text,
            }],
            stats: CollectionStats::default(),
            last_eviction_run: 0,
        }
    }

    fn new_entry(timestamp: i64) -> NewEntry {
        NewEntry {
            timestamp,
            filename: "file.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            status: EntryStatus::Ready,
            custom_fields: Map::new(),
        }
    }

    #[test]
    fn test_collection_crud() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();

        let loaded = repo.get_collection("docs").unwrap();
        assert_eq!(loaded.name, "docs");
        assert_eq!(loaded.retention.interval, "1h");
        assert_eq!(loaded.custom_fields.len(), 1);

        assert!(matches!(
            repo.create_collection(&col),
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            repo.get_collection("missing"),
            Err(ServiceError::NotFound(_))
        ));
        assert_eq!(repo.list_collections().unwrap().len(), 1);
    }

    #[test]
    fn test_create_entry_updates_stats() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();

        let entry = repo
            .create_entry_with_file(&col, &new_entry(1000), &mut |_, _| Ok(123))
            .unwrap();
        assert_eq!(entry.filesize, 123);
        assert_eq!(entry.status, EntryStatus::Ready);

        let stats = repo.collection_stats("docs").unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_disk_space_bytes, 123);
    }

    #[test]
    fn test_failed_file_write_rolls_back_row_and_stats() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();

        let result = repo.create_entry_with_file(&col, &new_entry(1000), &mut |_, _| {
            Err(ServiceError::Internal("disk full".to_string()))
        });
        assert!(result.is_err());

        let stats = repo.collection_stats("docs").unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.total_disk_space_bytes, 0);
        assert!(repo.list_entries("docs", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_processing_lifecycle() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();

        let mut pending = new_entry(1000);
        pending.status = EntryStatus::Processing;
        let entry = repo.create_processing_entry(&col, &pending).unwrap();
        assert_eq!(repo.collection_stats("docs").unwrap().entry_count, 1);
        assert_eq!(
            repo.collection_stats("docs").unwrap().total_disk_space_bytes,
            0
        );

        let completion = EntryCompletion {
            filesize: 456,
            mime_type: "audio/flac".to_string(),
            filename: "song.flac".to_string(),
            tech: TechMetadata {
                duration_sec: 12.5,
                channels: 2,
                ..Default::default()
            },
        };
        repo.finalize_entry("docs", entry.id, &completion).unwrap();

        let loaded = repo.get_entry("docs", entry.id).unwrap();
        assert_eq!(loaded.status, EntryStatus::Ready);
        assert_eq!(loaded.filesize, 456);
        assert_eq!(loaded.mime_type, "audio/flac");
        assert_eq!(loaded.channels, 2);
        assert_eq!(
            repo.collection_stats("docs").unwrap().total_disk_space_bytes,
            456
        );
    }

    #[test]
    fn test_delete_entry_returns_freed_size() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();
        let entry = repo
            .create_entry_with_file(&col, &new_entry(1000), &mut |_, _| Ok(99))
            .unwrap();

        let freed = repo.delete_entry("docs", entry.id).unwrap();
        assert_eq!(freed, 99);
        let stats = repo.collection_stats("docs").unwrap();
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.total_disk_space_bytes, 0);
        assert!(matches!(
            repo.delete_entry("docs", entry.id),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_bulk_delete_skips_unknown_ids_and_updates_stats() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();

        let mut ids = Vec::new();
        for (ts, size) in [(100, 10), (200, 20), (300, 30)] {
            let entry = repo
                .create_entry_with_file(&col, &new_entry(ts), &mut move |_, _| Ok(size))
                .unwrap();
            ids.push(entry.id);
        }

        let deleted = repo
            .delete_entries("docs", &[ids[0], ids[2], 9999])
            .unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(deleted.iter().map(|m| m.filesize).sum::<i64>(), 40);

        let stats = repo.collection_stats("docs").unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_disk_space_bytes, 20);
        assert!(repo.get_entry("docs", ids[1]).is_ok());

        assert!(repo.delete_entries("docs", &[]).unwrap().is_empty());
        assert!(repo.delete_entries("docs", &[9999]).unwrap().is_empty());
    }

    #[test]
    fn test_user_patch_merges_and_clears_custom_fields() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();

        let mut new = new_entry(1000);
        new.custom_fields
            .insert("note".to_string(), json!("original"));
        let entry = repo
            .create_entry_with_file(&col, &new, &mut |_, _| Ok(1))
            .unwrap();

        let mut patch = Map::new();
        patch.insert("note".to_string(), json!("changed"));
        let updated = repo
            .apply_user_patch("docs", entry.id, Some("renamed.bin"), &patch)
            .unwrap();
        assert_eq!(updated.filename, "renamed.bin");
        assert_eq!(updated.custom_fields["note"], "changed");

        let mut clear = Map::new();
        clear.insert("note".to_string(), Value::Null);
        let cleared = repo.apply_user_patch("docs", entry.id, None, &clear).unwrap();
        assert!(!cleared.custom_fields.contains_key("note"));
        assert_eq!(cleared.filename, "renamed.bin");
    }

    #[test]
    fn test_eviction_queries_skip_processing_entries() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();

        for ts in [100, 200, 300] {
            repo.create_entry_with_file(&col, &new_entry(ts), &mut |_, _| Ok(10))
                .unwrap();
        }
        let mut pending = new_entry(50);
        pending.status = EntryStatus::Processing;
        repo.create_processing_entry(&col, &pending).unwrap();

        let old = repo.entries_older_than("docs", 250).unwrap();
        assert_eq!(old.len(), 2);
        assert_eq!(old[0].timestamp, 100);

        let oldest = repo.oldest_entries("docs", 2).unwrap();
        assert_eq!(oldest.len(), 2);
        assert_eq!(oldest[0].timestamp, 100);
        assert_eq!(oldest[1].timestamp, 200);
    }

    #[test]
    fn test_fix_zombie_entries() {
        let repo = SqliteRepository::in_memory().unwrap();
        let col = test_collection("docs");
        repo.create_collection(&col).unwrap();

        let mut pending = new_entry(1000);
        pending.status = EntryStatus::Processing;
        let zombie = repo.create_processing_entry(&col, &pending).unwrap();
        repo.create_entry_with_file(&col, &new_entry(2000), &mut |_, _| Ok(1))
            .unwrap();

        let fixed = repo.fix_zombie_entries().unwrap();
        assert_eq!(fixed, 1);
        assert_eq!(
            repo.get_entry("docs", zombie.id).unwrap().status,
            EntryStatus::Error
        );
    }
}
