//! In-memory repository used by unit tests.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{DeletedEntryMeta, EntryFileWriter, Repository};
use crate::error::ServiceError;
use crate::models::{
    Collection, CollectionStats, Entry, EntryCompletion, EntryStatus, NewEntry, TechMetadata,
};

#[derive(Default)]
struct MockState {
    collections: HashMap<String, Collection>,
    entries: HashMap<String, Vec<Entry>>,
    next_id: i64,
    deleted: Vec<(String, i64)>,
    fail_delete_ids: HashSet<i64>,
    fail_get_collection: bool,
}

/// Test double with computed stats and scriptable failures.
#[derive(Default)]
pub struct MockRepository {
    state: Mutex<MockState>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collection(&self, collection: Collection) {
        let mut state = self.state.lock().unwrap();
        state
            .entries
            .entry(collection.name.clone())
            .or_default();
        state.collections.insert(collection.name.clone(), collection);
    }

    /// Inserts a ready entry directly, bypassing the ingest path.
    pub fn seed_entry(&self, collection: &str, timestamp: i64, filesize: i64) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.entries.entry(collection.to_string()).or_default().push(Entry {
            id,
            timestamp,
            filesize,
            filename: format!("seed-{}", id),
            mime_type: "application/octet-stream".to_string(),
            status: EntryStatus::Ready,
            width: 0,
            height: 0,
            duration_sec: 0.0,
            channels: 0,
            custom_fields: Map::new(),
        });
        id
    }

    /// Ids of entries removed through `delete_entry`, in deletion order.
    pub fn deleted_ids(&self, collection: &str) -> Vec<i64> {
        self.state
            .lock()
            .unwrap()
            .deleted
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Makes `delete_entry` fail for the given id.
    pub fn fail_delete_of(&self, id: i64) {
        self.state.lock().unwrap().fail_delete_ids.insert(id);
    }

    /// Makes every `get_collection` call fail.
    pub fn fail_get_collection(&self) {
        self.state.lock().unwrap().fail_get_collection = true;
    }

    pub fn last_eviction_run(&self, collection: &str) -> i64 {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .map(|c| c.last_eviction_run)
            .unwrap_or(0)
    }
}

fn settled(entry: &&Entry) -> bool {
    entry.status != EntryStatus::Processing
}

impl Repository for MockRepository {
    fn create_collection(&self, collection: &Collection) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.collections.contains_key(&collection.name) {
            return Err(ServiceError::Conflict(format!(
                "collection '{}' already exists",
                collection.name
            )));
        }
        state.entries.entry(collection.name.clone()).or_default();
        state
            .collections
            .insert(collection.name.clone(), collection.clone());
        Ok(())
    }

    fn get_collection(&self, name: &str) -> Result<Collection, ServiceError> {
        let state = self.state.lock().unwrap();
        if state.fail_get_collection {
            return Err(ServiceError::Internal("database unavailable".to_string()));
        }
        let mut collection = state
            .collections
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("collection '{}'", name)))?;
        collection.stats = compute_stats(&state, name);
        Ok(collection)
    }

    fn list_collections(&self) -> Result<Vec<Collection>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<&String> = state.collections.keys().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| {
                let mut c = state.collections[name].clone();
                c.stats = compute_stats(&state, name);
                c
            })
            .collect())
    }

    fn collection_stats(&self, name: &str) -> Result<CollectionStats, ServiceError> {
        let state = self.state.lock().unwrap();
        if !state.collections.contains_key(name) {
            return Err(ServiceError::NotFound(format!("collection '{}'", name)));
        }
        Ok(compute_stats(&state, name))
    }

    fn update_last_eviction_run(&self, name: &str, timestamp: i64) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.collections.get_mut(name) {
            c.last_eviction_run = timestamp;
        }
        Ok(())
    }

    fn create_entry_with_file(
        &self,
        collection: &Collection,
        new: &NewEntry,
        write: &mut EntryFileWriter,
    ) -> Result<Entry, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let filesize = write(id, new.timestamp)? as i64;
        let entry = Entry {
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
        };
        state
            .entries
            .entry(collection.name.clone())
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    fn create_processing_entry(
        &self,
        collection: &Collection,
        new: &NewEntry,
    ) -> Result<Entry, ServiceError> {
        self.create_entry_with_file(collection, new, &mut |_, _| Ok(0))
    }

    fn finalize_entry(
        &self,
        collection: &str,
        id: i64,
        completion: &EntryCompletion,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        let entry = find_mut(&mut state, collection, id)?;
        entry.filesize = completion.filesize;
        entry.mime_type = completion.mime_type.clone();
        entry.filename = completion.filename.clone();
        entry.status = EntryStatus::Ready;
        entry.width = completion.tech.width;
        entry.height = completion.tech.height;
        entry.duration_sec = completion.tech.duration_sec;
        entry.channels = completion.tech.channels;
        Ok(())
    }

    fn set_entry_status(
        &self,
        collection: &str,
        id: i64,
        status: EntryStatus,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        find_mut(&mut state, collection, id)?.status = status;
        Ok(())
    }

    fn update_tech_metadata(
        &self,
        collection: &str,
        id: i64,
        tech: &TechMetadata,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        let entry = find_mut(&mut state, collection, id)?;
        entry.width = tech.width;
        entry.height = tech.height;
        entry.duration_sec = tech.duration_sec;
        entry.channels = tech.channels;
        Ok(())
    }

    fn apply_user_patch(
        &self,
        collection: &str,
        id: i64,
        filename: Option<&str>,
        custom_fields: &Map<String, Value>,
    ) -> Result<Entry, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let entry = find_mut(&mut state, collection, id)?;
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
        Ok(entry.clone())
    }

    fn get_entry(&self, collection: &str, id: i64) -> Result<Entry, ServiceError> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .get(collection)
            .and_then(|list| list.iter().find(|e| e.id == id))
            .cloned()
            .ok_or_else(|| {
                ServiceError::NotFound(format!("entry {} in collection '{}'", id, collection))
            })
    }

    fn list_entries(
        &self,
        collection: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut list = state.entries.get(collection).cloned().unwrap_or_default();
        list.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(list
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    fn delete_entry(&self, collection: &str, id: i64) -> Result<i64, ServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete_ids.contains(&id) {
            return Err(ServiceError::Internal(format!(
                "simulated delete failure for entry {}",
                id
            )));
        }
        let list = state.entries.get_mut(collection).ok_or_else(|| {
            ServiceError::NotFound(format!("collection '{}'", collection))
        })?;
        let pos = list.iter().position(|e| e.id == id).ok_or_else(|| {
            ServiceError::NotFound(format!("entry {} in collection '{}'", id, collection))
        })?;
        let removed = list.remove(pos);
        state.deleted.push((collection.to_string(), id));
        Ok(removed.filesize)
    }

    fn delete_entries(
        &self,
        collection: &str,
        ids: &[i64],
    ) -> Result<Vec<DeletedEntryMeta>, ServiceError> {
        let mut state = self.state.lock().unwrap();
        // Transactional: a scripted failure on any requested id fails the
        // whole batch with nothing removed.
        if ids.iter().any(|id| state.fail_delete_ids.contains(id)) {
            return Err(ServiceError::Internal(
                "simulated bulk delete failure".to_string(),
            ));
        }
        let list = state.entries.get_mut(collection).ok_or_else(|| {
            ServiceError::NotFound(format!("collection '{}'", collection))
        })?;
        let mut found = Vec::new();
        list.retain(|entry| {
            if ids.contains(&entry.id) {
                found.push(DeletedEntryMeta {
                    id: entry.id,
                    timestamp: entry.timestamp,
                    filesize: entry.filesize,
                });
                false
            } else {
                true
            }
        });
        for meta in &found {
            state.deleted.push((collection.to_string(), meta.id));
        }
        Ok(found)
    }

    fn entries_older_than(
        &self,
        collection: &str,
        cutoff: i64,
    ) -> Result<Vec<Entry>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<Entry> = state
            .entries
            .get(collection)
            .map(|list| {
                list.iter()
                    .filter(settled)
                    .filter(|e| e.timestamp < cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|e| (e.timestamp, e.id));
        Ok(out)
    }

    fn oldest_entries(&self, collection: &str, limit: i64) -> Result<Vec<Entry>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<Entry> = state
            .entries
            .get(collection)
            .map(|list| list.iter().filter(settled).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|e| (e.timestamp, e.id));
        out.truncate(limit as usize);
        Ok(out)
    }

    fn fix_zombie_entries(&self) -> Result<u64, ServiceError> {
        let mut state = self.state.lock().unwrap();
        let mut fixed = 0;
        for list in state.entries.values_mut() {
            for entry in list.iter_mut() {
                if entry.status == EntryStatus::Processing {
                    entry.status = EntryStatus::Error;
                    fixed += 1;
                }
            }
        }
        Ok(fixed)
    }
}

fn compute_stats(state: &MockState, name: &str) -> CollectionStats {
    let list = match state.entries.get(name) {
        Some(list) => list,
        None => return CollectionStats::default(),
    };
    CollectionStats {
        entry_count: list.len() as i64,
        total_disk_space_bytes: list.iter().map(|e| e.filesize).sum(),
    }
}

fn find_mut<'a>(
    state: &'a mut MockState,
    collection: &str,
    id: i64,
) -> Result<&'a mut Entry, ServiceError> {
    state
        .entries
        .get_mut(collection)
        .and_then(|list| list.iter_mut().find(|e| e.id == id))
        .ok_or_else(|| {
            ServiceError::NotFound(format!("entry {} in collection '{}'", id, collection))
        })
}
