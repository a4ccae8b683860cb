//! File Storage Layer
//!
//! Deterministic mapping from (collection, timestamp, entry id) to an
//! absolute path, partitioned by year/month. Parent directories are created
//! on demand and any path escaping the storage root is rejected.

use chrono::{TimeZone, Utc};
use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::config::StorageConfig;
use crate::error::ServiceError;

/// Resolves and manages on-disk entry and preview files.
pub struct FileStore {
    root: PathBuf,
    temp: PathBuf,
}

impl FileStore {
    pub fn new(config: &StorageConfig) -> io::Result<Self> {
        let root = PathBuf::from(&config.base_path);
        let temp = PathBuf::from(&config.temp_path);
        fs::create_dir_all(&root)?;
        fs::create_dir_all(&temp)?;
        Ok(Self { root, temp })
    }

    /// Spool directory for transport and worker temp files.
    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    /// Absolute path of an entry's main file. Creates the year/month
    /// directory structure if needed.
    pub fn entry_path(
        &self,
        collection: &str,
        timestamp: i64,
        id: i64,
    ) -> Result<PathBuf, ServiceError> {
        self.resolve(&[collection], timestamp, id)
    }

    /// Absolute path of an entry's preview file.
    pub fn preview_path(
        &self,
        collection: &str,
        timestamp: i64,
        id: i64,
    ) -> Result<PathBuf, ServiceError> {
        self.resolve(&["previews", collection], timestamp, id)
    }

    fn resolve(&self, sub_dirs: &[&str], timestamp: i64, id: i64) -> Result<PathBuf, ServiceError> {
        let t = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or_else(|| ServiceError::Validation(format!("invalid timestamp: {}", timestamp)))?;

        let mut dir = self.root.clone();
        for part in sub_dirs {
            dir.push(part);
        }
        dir.push(t.format("%Y").to_string());
        dir.push(t.format("%m").to_string());

        // Path traversal guard: the partition directory must stay under the
        // storage root and contain no parent-dir components.
        let escapes = dir
            .components()
            .any(|c| matches!(c, Component::ParentDir))
            || !dir.starts_with(&self.root)
            || dir == self.root;
        if escapes {
            return Err(ServiceError::Validation(
                "invalid path: potential path traversal".to_string(),
            ));
        }

        fs::create_dir_all(&dir)
            .map_err(|e| ServiceError::Internal(format!("could not create directory: {}", e)))?;

        Ok(dir.join(id.to_string()))
    }

    /// Writes a complete in-memory buffer to `path` and returns its size.
    pub fn save_bytes(&self, data: &[u8], path: &Path) -> io::Result<u64> {
        fs::write(path, data)?;
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(data.len() as u64)
    }

    /// Best-effort deletion of an entry's main file. A missing file is not
    /// an error; other failures are logged by the caller.
    pub fn delete_entry_file(&self, collection: &str, timestamp: i64, id: i64) -> Result<(), ServiceError> {
        let path = self.entry_path(collection, timestamp, id)?;
        remove_if_exists(&path)
    }

    /// Best-effort deletion of an entry's preview file.
    pub fn delete_preview_file(&self, collection: &str, timestamp: i64, id: i64) -> Result<(), ServiceError> {
        let path = self.preview_path(collection, timestamp, id)?;
        remove_if_exists(&path)
    }
}

fn remove_if_exists(path: &Path) -> Result<(), ServiceError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            Err(ServiceError::internal(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: dir.path().join("storage").to_string_lossy().into_owned(),
            temp_path: dir.path().join("temp").to_string_lossy().into_owned(),
        };
        (FileStore::new(&config).unwrap(), dir)
    }

    #[test]
    fn test_entry_path_partitions_by_year_and_month() {
        let (store, _dir) = store();
        // 2023-11-15 00:00:00 UTC
        let path = store.entry_path("photos", 1700006400, 42).unwrap();
        let s = path.to_string_lossy();
        assert!(s.ends_with("photos/2023/11/42"), "got {}", s);
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_preview_path_is_separate_tree() {
        let (store, _dir) = store();
        let path = store.preview_path("photos", 1700006400, 42).unwrap();
        let s = path.to_string_lossy();
        assert!(s.contains("previews/photos/2023/11"), "got {}", s);
    }

    #[test]
    fn test_traversal_is_rejected() {
        let (store, _dir) = store();
        let err = store.entry_path("../../etc", 1700006400, 1);
        assert!(matches!(err, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_delete_missing_file_is_not_an_error() {
        let (store, _dir) = store();
        store.delete_entry_file("photos", 1700006400, 999).unwrap();
        store.delete_preview_file("photos", 1700006400, 999).unwrap();
    }

    #[test]
    fn test_save_bytes_reports_size() {
        let (store, _dir) = store();
        let path = store.entry_path("photos", 1700006400, 7).unwrap();
        let n = store.save_bytes(b"hello", &path).unwrap();
        assert_eq!(n, 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
