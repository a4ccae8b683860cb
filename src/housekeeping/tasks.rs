//! Two-phase retention eviction.
//!
//! Phase 1 deletes everything older than `max_age`. Phase 2 re-reads disk
//! usage and deletes oldest-first until the collection fits `max_disk_space`.
//! Row deletion carries the stats decrement; file removal afterwards is
//! best-effort. Policy parse and stats-read failures abort the run for that
//! collection, individual deletions do not.

use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;

use super::CollectionLocks;
use crate::error::ServiceError;
use crate::models::{Collection, Entry, EvictionReport};
use crate::repository::Repository;
use crate::storage::FileStore;
use crate::util::{format_bytes, parse_duration, parse_size};

const QUOTA_BATCH: i64 = 100;

/// One scheduler pass: evict every collection whose interval has elapsed.
pub fn run_cycle(repo: &Arc<dyn Repository>, store: &Arc<FileStore>, locks: &CollectionLocks) {
    let collections = match repo.list_collections() {
        Ok(collections) => collections,
        Err(e) => {
            error!("Retention cycle could not list collections: {}", e);
            return;
        }
    };

    let now = Utc::now().timestamp();
    for collection in collections {
        let interval = match parse_duration(&collection.retention.interval) {
            Ok(interval) if !interval.is_zero() => interval,
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    "Collection '{}' has an unusable interval: {}",
                    collection.name, e
                );
                continue;
            }
        };
        if now < collection.last_eviction_run + interval.as_secs() as i64 {
            continue;
        }
        if let Err(e) = run_manual(repo, store, locks, &collection.name) {
            error!("Eviction for '{}' failed: {}", collection.name, e);
        }
    }
}

/// Runs eviction for one collection and records the run time. Shared by the
/// scheduler and the manual trigger endpoint.
pub fn run_manual(
    repo: &Arc<dyn Repository>,
    store: &Arc<FileStore>,
    locks: &CollectionLocks,
    name: &str,
) -> Result<EvictionReport, ServiceError> {
    let report = run_for_collection(repo, store, locks, name)?;
    repo.update_last_eviction_run(name, Utc::now().timestamp())?;
    Ok(report)
}

pub fn run_for_collection(
    repo: &Arc<dyn Repository>,
    store: &Arc<FileStore>,
    locks: &CollectionLocks,
    name: &str,
) -> Result<EvictionReport, ServiceError> {
    let lock = locks.lock_for(name);
    let _guard = lock.lock().unwrap();

    let collection = repo.get_collection(name)?;
    let mut report = EvictionReport::new(name);

    age_phase(repo, store, &collection, &mut report)?;
    quota_phase(repo, store, &collection, &mut report)?;

    report.message = format!(
        "Eviction complete for '{}'. {} entries deleted, freeing {}.",
        name,
        report.entries_deleted,
        format_bytes(report.bytes_freed)
    );
    info!("{}", report.message);
    Ok(report)
}

fn age_phase(
    repo: &Arc<dyn Repository>,
    store: &Arc<FileStore>,
    collection: &Collection,
    report: &mut EvictionReport,
) -> Result<(), ServiceError> {
    let max_age = parse_duration(&collection.retention.max_age)?;
    if max_age.is_zero() {
        return Ok(());
    }

    let cutoff = Utc::now().timestamp() - max_age.as_secs() as i64;
    let expired = repo.entries_older_than(&collection.name, cutoff)?;
    for entry in expired {
        delete_one(repo, store, collection, &entry, report);
    }
    Ok(())
}

fn quota_phase(
    repo: &Arc<dyn Repository>,
    store: &Arc<FileStore>,
    collection: &Collection,
    report: &mut EvictionReport,
) -> Result<(), ServiceError> {
    let quota = parse_size(&collection.retention.max_disk_space)?;
    if quota == 0 {
        return Ok(());
    }

    loop {
        let stats = repo.collection_stats(&collection.name)?;
        let mut usage = stats.total_disk_space_bytes.max(0) as u64;
        if usage <= quota {
            return Ok(());
        }

        let batch = repo.oldest_entries(&collection.name, QUOTA_BATCH)?;
        if batch.is_empty() {
            return Ok(());
        }

        let deleted_before = report.entries_deleted;
        for entry in batch {
            if usage <= quota {
                break;
            }
            let freed_before = report.bytes_freed;
            delete_one(repo, store, collection, &entry, report);
            usage = usage.saturating_sub(report.bytes_freed - freed_before);
        }

        // Every deletion in the batch failed; retrying the same batch
        // forever would spin, so give up with an error.
        if report.entries_deleted == deleted_before {
            return Err(ServiceError::Internal(format!(
                "quota eviction for '{}' made no progress",
                collection.name
            )));
        }
    }
}

/// Row first (stats decrement rides the same transaction), files afterwards.
fn delete_one(
    repo: &Arc<dyn Repository>,
    store: &Arc<FileStore>,
    collection: &Collection,
    entry: &Entry,
    report: &mut EvictionReport,
) {
    match repo.delete_entry(&collection.name, entry.id) {
        Ok(freed) => {
            report.entries_deleted += 1;
            report.bytes_freed += freed.max(0) as u64;
        }
        Err(e) => {
            warn!(
                "Could not evict entry {} from '{}': {}",
                entry.id, collection.name, e
            );
            return;
        }
    }
    if let Err(e) = store.delete_entry_file(&collection.name, entry.timestamp, entry.id) {
        warn!("Evicted entry {} left its file behind: {}", entry.id, e);
    }
    if let Err(e) = store.delete_preview_file(&collection.name, entry.timestamp, entry.id) {
        warn!("Evicted entry {} left its preview behind: {}", entry.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::models::{
        CollectionConfig, CollectionStats, ContentType, RetentionPolicy,
    };
    use crate::repository::MockRepository;
    use tempfile::TempDir;

    struct Fixture {
        repo: Arc<dyn Repository>,
        mock: Arc<MockRepository>,
        store: Arc<FileStore>,
        locks: CollectionLocks,
        _dir: TempDir,
    }

    fn fixture(max_age: &str, max_disk_space: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(&StorageConfig {
            base_path: dir.path().join("storage").to_string_lossy().into_owned(),
            temp_path: dir.path().join("temp").to_string_lossy().into_owned(),
        })
        .unwrap();

        let mock = Arc::new(MockRepository::new());
        mock.add_collection(Collection {
            name: "docs".to_string(),
            content_type: ContentType::File,
            config: CollectionConfig::default(),
            retention: RetentionPolicy {
                interval: "1h".to_string(),
                max_age: max_age.to_string(),
                max_disk_space: max_disk_space.to_string(),
            },
            custom_fields: vec![],
            stats: CollectionStats::default(),
            last_eviction_run: 0,
        });

        Fixture {
            repo: mock.clone(),
            mock,
            store: Arc::new(store),
            locks: CollectionLocks::new(),
            _dir: dir,
        }
    }

    #[test]
    fn test_empty_collection_is_a_noop() {
        let f = fixture("30d", "100G");
        let report = run_for_collection(&f.repo, &f.store, &f.locks, "docs").unwrap();
        assert_eq!(report.entries_deleted, 0);
        assert_eq!(report.bytes_freed, 0);
        assert!(report.message.contains("0 entries deleted"));
    }

    #[test]
    fn test_age_phase_deletes_only_expired_entries() {
        let f = fixture("1d", "100G");
        let now = Utc::now().timestamp();
        let old_a = f.mock.seed_entry("docs", now - 3 * 86400, 10);
        let old_b = f.mock.seed_entry("docs", now - 2 * 86400, 10);
        f.mock.seed_entry("docs", now - 100, 10);

        let report = run_for_collection(&f.repo, &f.store, &f.locks, "docs").unwrap();
        assert_eq!(report.entries_deleted, 2);
        assert_eq!(report.bytes_freed, 20);
        // Oldest first.
        assert_eq!(f.mock.deleted_ids("docs"), vec![old_a, old_b]);
    }

    #[test]
    fn test_age_phase_disabled_by_zero() {
        let f = fixture("0", "100G");
        let now = Utc::now().timestamp();
        f.mock.seed_entry("docs", now - 365 * 86400, 10);

        let report = run_for_collection(&f.repo, &f.store, &f.locks, "docs").unwrap();
        assert_eq!(report.entries_deleted, 0);
    }

    #[test]
    fn test_quota_phase_deletes_oldest_until_under_quota() {
        // Quota 1K; four 400-byte entries = 1600 bytes, two must go.
        let f = fixture("0", "1K");
        let now = Utc::now().timestamp();
        let oldest = f.mock.seed_entry("docs", now - 400, 400);
        let second = f.mock.seed_entry("docs", now - 300, 400);
        f.mock.seed_entry("docs", now - 200, 400);
        f.mock.seed_entry("docs", now - 100, 400);

        let report = run_for_collection(&f.repo, &f.store, &f.locks, "docs").unwrap();
        assert_eq!(report.entries_deleted, 2);
        assert_eq!(report.bytes_freed, 800);
        assert_eq!(f.mock.deleted_ids("docs"), vec![oldest, second]);
        assert_eq!(
            f.repo
                .collection_stats("docs")
                .unwrap()
                .total_disk_space_bytes,
            800
        );
    }

    #[test]
    fn test_quota_phase_disabled_by_zero() {
        let f = fixture("0", "0");
        let now = Utc::now().timestamp();
        f.mock.seed_entry("docs", now, 1 << 30);

        let report = run_for_collection(&f.repo, &f.store, &f.locks, "docs").unwrap();
        assert_eq!(report.entries_deleted, 0);
    }

    #[test]
    fn test_age_phase_runs_before_quota_phase() {
        // Age phase alone frees enough that the quota phase has nothing to do.
        let f = fixture("1d", "1K");
        let now = Utc::now().timestamp();
        let expired = f.mock.seed_entry("docs", now - 2 * 86400, 2048);
        let fresh = f.mock.seed_entry("docs", now - 100, 512);

        let report = run_for_collection(&f.repo, &f.store, &f.locks, "docs").unwrap();
        assert_eq!(report.entries_deleted, 1);
        assert_eq!(f.mock.deleted_ids("docs"), vec![expired]);
        assert!(f.repo.get_entry("docs", fresh).is_ok());
    }

    #[test]
    fn test_failed_row_delete_is_skipped_not_fatal() {
        let f = fixture("1d", "100G");
        let now = Utc::now().timestamp();
        let stuck = f.mock.seed_entry("docs", now - 3 * 86400, 10);
        let other = f.mock.seed_entry("docs", now - 2 * 86400, 10);
        f.mock.fail_delete_of(stuck);

        let report = run_for_collection(&f.repo, &f.store, &f.locks, "docs").unwrap();
        assert_eq!(report.entries_deleted, 1);
        assert_eq!(f.mock.deleted_ids("docs"), vec![other]);
    }

    #[test]
    fn test_quota_phase_aborts_when_no_progress_possible() {
        let f = fixture("0", "1K");
        let now = Utc::now().timestamp();
        let a = f.mock.seed_entry("docs", now - 200, 2048);
        f.mock.fail_delete_of(a);

        let err = run_for_collection(&f.repo, &f.store, &f.locks, "docs");
        assert!(matches!(err, Err(ServiceError::Internal(_))));
    }

    #[test]
    fn test_collection_read_failure_aborts_run() {
        let f = fixture("1d", "100G");
        f.mock.fail_get_collection();
        assert!(run_for_collection(&f.repo, &f.store, &f.locks, "docs").is_err());
    }

    #[test]
    fn test_bad_policy_string_aborts_run() {
        let f = fixture("next tuesday", "100G");
        let err = run_for_collection(&f.repo, &f.store, &f.locks, "docs");
        assert!(matches!(err, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_manual_run_updates_last_eviction_run() {
        let f = fixture("30d", "100G");
        assert_eq!(f.mock.last_eviction_run("docs"), 0);
        run_manual(&f.repo, &f.store, &f.locks, "docs").unwrap();
        assert!(f.mock.last_eviction_run("docs") > 0);
    }
}
