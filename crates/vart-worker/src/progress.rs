//! In-memory progress store read by status pollers.
//!
//! Created once per process and shared by handle. Each job id is written by
//! one runner at a time; records are replaced wholesale so readers never see
//! a half-updated entry.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vart_models::{JobId, ProgressRecord, ProgressStatus};

#[derive(Default)]
struct Entries {
    records: HashMap<JobId, ProgressRecord>,
    /// Jobs a runner is currently executing; never evicted
    active: HashSet<JobId>,
}

/// Shared map from job id to its latest progress record.
#[derive(Clone, Default)]
pub struct ProgressStore {
    inner: Arc<RwLock<Entries>>,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("entries", &self.len())
            .finish()
    }
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        // A panic while holding the lock cannot leave a record half-written.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `record` as the job's latest state.
    ///
    /// Within one attempt progress never goes down, except that `Failed`
    /// keeps the value it is published with. A terminal record is only
    /// replaced by a record that starts a new attempt. Returns whether the
    /// record was stored.
    pub fn publish(&self, mut record: ProgressRecord) -> bool {
        let mut entries = self.write();

        if let Some(current) = entries.records.get(&record.job_id) {
            if !record.status.resets_progress() {
                if current.is_terminal() {
                    debug!(
                        job_id = %record.job_id,
                        current = %current.status,
                        rejected = %record.status,
                        "Ignoring update after terminal state"
                    );
                    return false;
                }
                if !current.status.can_transition_to(record.status) {
                    warn!(
                        job_id = %record.job_id,
                        from = %current.status,
                        to = %record.status,
                        "Ignoring invalid progress transition"
                    );
                    return false;
                }
                if record.status != ProgressStatus::Failed {
                    record.progress = record.progress.max(current.progress);
                }
            }
        }

        entries.records.insert(record.job_id.clone(), record);
        true
    }

    /// Convenience wrapper around [`publish`](Self::publish).
    pub fn update(
        &self,
        job_id: &JobId,
        status: ProgressStatus,
        progress: f32,
        message: impl Into<String>,
    ) -> bool {
        self.publish(ProgressRecord::new(job_id.clone(), status, progress, message))
    }

    pub fn get(&self, job_id: &JobId) -> Option<ProgressRecord> {
        self.read().records.get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a job as being executed (or no longer executed) by a runner.
    pub fn set_active(&self, job_id: &JobId, active: bool) {
        let mut entries = self.write();
        if active {
            entries.active.insert(job_id.clone());
        } else {
            entries.active.remove(job_id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.read().active.len()
    }

    /// Remove entries of inactive jobs last updated before `cutoff`.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.write();
        let Entries { records, active } = &mut *entries;
        let before = records.len();
        records.retain(|id, record| active.contains(id) || record.updated_at >= cutoff);
        let evicted = before - records.len();

        crate::metrics::record_progress_entries(records.len());
        if evicted > 0 {
            crate::metrics::record_evicted(evicted);
        }
        evicted
    }

    /// Remove entries of inactive jobs not updated within `ttl`.
    pub fn evict_stale(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.evict_older_than(cutoff)
    }
}

/// Periodically evict stale progress entries until `shutdown` flips to true.
pub fn spawn_sweeper(
    store: ProgressStore,
    ttl: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        info!("Progress sweeper started (ttl {:?}, every {:?})", ttl, interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let evicted = store.evict_stale(ttl);
                    if evicted > 0 {
                        debug!("Evicted {} stale progress entries", evicted);
                    }
                }
            }
        }
        info!("Progress sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProgressStatus::*;

    fn record(id: &JobId, status: ProgressStatus, progress: f32) -> ProgressRecord {
        ProgressRecord::new(id.clone(), status, progress, status.as_str())
    }

    #[test]
    fn test_progress_is_monotonic_within_attempt() {
        let store = ProgressStore::new();
        let id = JobId::new();
        store.publish(ProgressRecord::starting(id.clone()));
        store.publish(record(&id, Processing, 40.0));
        store.publish(record(&id, Processing, 20.0));
        assert_eq!(store.get(&id).unwrap().progress, 40.0);
    }

    #[test]
    fn test_failure_reports_its_own_progress() {
        let store = ProgressStore::new();
        let id = JobId::new();
        store.publish(ProgressRecord::starting(id.clone()));
        store.publish(record(&id, Processing, 60.0));
        store.publish(record(&id, Finalizing, 95.0));
        assert!(store.publish(record(&id, Failed, 0.0)));

        let latest = store.get(&id).unwrap();
        assert_eq!(latest.status, Failed);
        assert_eq!(latest.progress, 0.0);
    }

    #[test]
    fn test_retry_resets_progress() {
        let store = ProgressStore::new();
        let id = JobId::new();
        store.publish(ProgressRecord::starting(id.clone()));
        store.publish(record(&id, Processing, 60.0));
        assert!(store.publish(record(&id, Retrying, 0.0)));
        assert_eq!(store.get(&id).unwrap().progress, 0.0);
        assert!(store.publish(ProgressRecord::starting(id.clone())));
        assert_eq!(store.get(&id).unwrap().status, Starting);
    }

    #[test]
    fn test_terminal_record_not_overwritten() {
        let store = ProgressStore::new();
        let id = JobId::new();
        store.publish(ProgressRecord::starting(id.clone()));
        store.publish(record(&id, Processing, 50.0));
        store.publish(record(&id, Finalizing, 95.0));
        store.publish(ProgressRecord::completed(id.clone()));

        assert!(!store.publish(record(&id, Processing, 10.0)));
        assert!(!store.publish(record(&id, Failed, 10.0)));
        let latest = store.get(&id).unwrap();
        assert_eq!(latest.status, Completed);
        assert_eq!(latest.progress, 100.0);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let store = ProgressStore::new();
        let id = JobId::new();
        store.publish(ProgressRecord::starting(id.clone()));
        assert!(!store.publish(ProgressRecord::completed(id.clone())));
        assert_eq!(store.get(&id).unwrap().status, Starting);
    }

    #[test]
    fn test_eviction_skips_active_jobs() {
        let store = ProgressStore::new();
        let running = JobId::new();
        let finished = JobId::new();
        store.publish(ProgressRecord::starting(running.clone()));
        store.publish(ProgressRecord::starting(finished.clone()));
        store.set_active(&running, true);

        let evicted = store.evict_older_than(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(evicted, 1);
        assert!(store.get(&running).is_some());
        assert!(store.get(&finished).is_none());

        store.set_active(&running, false);
        assert_eq!(store.evict_stale(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_readers_share_one_store() {
        let store = ProgressStore::new();
        let reader = store.clone();
        let id = JobId::new();
        store.publish(ProgressRecord::starting(id.clone()));
        assert!(reader.get(&id).is_some());
    }

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let store = ProgressStore::new();
        let id = JobId::new();
        store.publish(ProgressRecord::starting(id.clone()));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(store.clone(), Duration::ZERO, Duration::from_millis(5), rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get(&id).is_none());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
