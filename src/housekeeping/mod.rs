//! Housekeeping
//!
//! The retention scheduler and the per-collection eviction runner. A single
//! long-lived loop fires eviction for due collections; manual triggers run
//! the same code path. Concurrent runs on one collection are excluded by an
//! advisory lock per collection.

pub mod tasks;

use log::{error, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::repository::Repository;
use crate::storage::FileStore;
use crate::util::parse_duration;

/// Scheduler floor: even an aggressive interval never wakes up more often
/// than once a minute.
const MIN_SLEEP: Duration = Duration::from_secs(60);
/// Sleep when no collection has a usable interval.
const DEFAULT_SLEEP: Duration = Duration::from_secs(3600);

/// Advisory locks keyed by collection name, shared between the scheduler
/// and the manual trigger endpoint.
#[derive(Default)]
pub struct CollectionLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Spawns the retention loop. The first cycle runs immediately so a
    /// restart cannot push overdue evictions a full interval into the future.
    pub fn spawn(
        repo: Arc<dyn Repository>,
        store: Arc<FileStore>,
        locks: Arc<CollectionLocks>,
    ) {
        tokio::spawn(async move {
            info!("Retention scheduler started");
            loop {
                let cycle_repo = repo.clone();
                let cycle_store = store.clone();
                let cycle_locks = locks.clone();
                let result = tokio::task::spawn_blocking(move || {
                    tasks::run_cycle(&cycle_repo, &cycle_store, &cycle_locks)
                })
                .await;
                if let Err(e) = result {
                    error!("Retention cycle panicked: {}", e);
                }

                let sleep_repo = repo.clone();
                let sleep = tokio::task::spawn_blocking(move || next_wakeup(&sleep_repo))
                    .await
                    .unwrap_or(DEFAULT_SLEEP);
                tokio::time::sleep(sleep).await;
            }
        });
    }
}

/// Time until the next collection is due, clamped to the scheduler floor.
fn next_wakeup(repo: &Arc<dyn Repository>) -> Duration {
    let collections = match repo.list_collections() {
        Ok(collections) => collections,
        Err(e) => {
            error!("Could not list collections for scheduling: {}", e);
            return DEFAULT_SLEEP;
        }
    };

    let now = Utc::now().timestamp();
    let mut soonest: Option<i64> = None;
    for collection in &collections {
        let interval = match parse_duration(&collection.retention.interval) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => continue,
        };
        let due_at = collection.last_eviction_run + interval.as_secs() as i64;
        let wait = due_at - now;
        soonest = Some(match soonest {
            Some(current) => current.min(wait),
            None => wait,
        });
    }

    match soonest {
        Some(wait) => Duration::from_secs(wait.max(0) as u64).max(MIN_SLEEP),
        None => DEFAULT_SLEEP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Collection, CollectionConfig, CollectionStats, ContentType, RetentionPolicy,
    };
    use crate::repository::MockRepository;

    fn collection(name: &str, interval: &str, last_run: i64) -> Collection {
        Collection {
            name: name.to_string(),
            content_type: ContentType::File,
            config: CollectionConfig::default(),
            retention: RetentionPolicy {
                interval: interval.to_string(),
                ..Default::default()
            },
            custom_fields: vec![],
            stats: CollectionStats::default(),
            last_eviction_run: last_run,
        }
    }

    #[test]
    fn test_next_wakeup_defaults_without_collections() {
        let repo: Arc<dyn Repository> = Arc::new(MockRepository::new());
        assert_eq!(next_wakeup(&repo), DEFAULT_SLEEP);
    }

    #[test]
    fn test_next_wakeup_clamps_to_floor_when_overdue() {
        let mock = MockRepository::new();
        mock.add_collection(collection("docs", "1h", 0));
        let repo: Arc<dyn Repository> = Arc::new(mock);
        assert_eq!(next_wakeup(&repo), MIN_SLEEP);
    }

    #[test]
    fn test_next_wakeup_picks_soonest_collection() {
        let now = Utc::now().timestamp();
        let mock = MockRepository::new();
        mock.add_collection(collection("slow", "12h", now));
        mock.add_collection(collection("fast", "2h", now));
        let repo: Arc<dyn Repository> = Arc::new(mock);

        let wait = next_wakeup(&repo);
        assert!(wait > Duration::from_secs(3600), "got {:?}", wait);
        assert!(wait <= Duration::from_secs(2 * 3600), "got {:?}", wait);
    }

    #[test]
    fn test_disabled_intervals_are_ignored() {
        let mock = MockRepository::new();
        mock.add_collection(collection("manual_only", "0", 0));
        let repo: Arc<dyn Repository> = Arc::new(mock);
        assert_eq!(next_wakeup(&repo), DEFAULT_SLEEP);
    }

    #[test]
    fn test_collection_locks_are_stable_per_name() {
        let locks = CollectionLocks::new();
        let a = locks.lock_for("docs");
        let b = locks.lock_for("docs");
        assert!(Arc::ptr_eq(&a, &b));
        let c = locks.lock_for("other");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
