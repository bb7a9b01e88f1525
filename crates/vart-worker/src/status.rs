//! Status queries for pollers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use vart_models::{JobId, JobStatus};

use crate::error::WorkerResult;
use crate::progress::ProgressStore;
use crate::store::JobStore;

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Live record from the progress store
    Live,
    /// Synthesized from the persisted job (e.g. after a restart)
    Persisted,
}

/// What a poller sees for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub job_id: JobId,
    pub status: String,
    pub progress: f32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub source: SnapshotSource,
}

/// Answers progress queries, preferring live records.
#[derive(Clone)]
pub struct StatusService {
    progress: ProgressStore,
    store: Arc<dyn JobStore>,
}

impl StatusService {
    pub fn new(progress: ProgressStore, store: Arc<dyn JobStore>) -> Self {
        Self { progress, store }
    }

    pub async fn get_progress(&self, id: &JobId) -> WorkerResult<Option<StatusSnapshot>> {
        if let Some(record) = self.progress.get(id) {
            return Ok(Some(StatusSnapshot {
                job_id: record.job_id,
                status: record.status.as_str().to_string(),
                progress: record.progress,
                message: record.message,
                error: None,
                updated_at: record.updated_at,
                source: SnapshotSource::Live,
            }));
        }

        let Some(job) = self.store.get_job(id).await? else {
            return Ok(None);
        };
        let progress = match job.status {
            JobStatus::Completed => 100.0,
            _ => job.progress,
        };
        Ok(Some(StatusSnapshot {
            job_id: job.id,
            status: job.status.as_str().to_string(),
            progress,
            message: format!("Project status: {}", job.status),
            error: job.error_message,
            updated_at: job.updated_at,
            source: SnapshotSource::Persisted,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockJobStore;
    use vart_models::{Job, ProcessingParams, ProgressRecord};

    #[tokio::test]
    async fn test_live_record_preferred() {
        let progress = ProgressStore::new();
        let id = JobId::new();
        progress.publish(ProgressRecord::starting(id.clone()));

        let mut store = MockJobStore::new();
        store.expect_get_job().never();

        let snapshot = StatusService::new(progress, Arc::new(store))
            .get_progress(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.status, "starting");
        assert_eq!(snapshot.source, SnapshotSource::Live);
    }

    #[tokio::test]
    async fn test_falls_back_to_persisted_status() {
        let mut job = Job::new("in.y4m", "out.mp4", ProcessingParams::new("pencil"));
        job.status = JobStatus::Completed;
        let id = job.id.clone();

        let mut store = MockJobStore::new();
        store
            .expect_get_job()
            .times(1)
            .returning(move |_| Ok(Some(job.clone())));

        let snapshot = StatusService::new(ProgressStore::new(), Arc::new(store))
            .get_progress(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.message, "Project status: completed");
        assert_eq!(snapshot.progress, 100.0);
        assert_eq!(snapshot.source, SnapshotSource::Persisted);
    }

    #[tokio::test]
    async fn test_unknown_job_is_none() {
        let mut store = MockJobStore::new();
        store.expect_get_job().returning(|_| Ok(None));
        let snapshot = StatusService::new(ProgressStore::new(), Arc::new(store))
            .get_progress(&JobId::new())
            .await
            .unwrap();
        assert!(snapshot.is_none());
    }
}
