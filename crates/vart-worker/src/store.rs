//! Persistence collaborator for job records.
//!
//! The runner touches persistence only when a job starts and when it reaches
//! a terminal state. Intra-job progress goes through the progress store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use vart_models::{Job, JobId, JobStatus, SourceInfo};

use crate::error::{WorkerError, WorkerResult};

/// Fields written alongside a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub progress: Option<f32>,
    pub result_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub source_info: Option<SourceInfo>,
}

impl StatusUpdate {
    pub fn completed(result_path: PathBuf, source_info: Option<SourceInfo>) -> Self {
        Self {
            progress: Some(100.0),
            result_path: Some(result_path),
            error_message: None,
            source_info,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }
}

/// Job persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, id: &JobId) -> WorkerResult<Option<Job>>;

    async fn update_job_status(
        &self,
        id: &JobId,
        status: JobStatus,
        update: StatusUpdate,
    ) -> WorkerResult<()>;
}

/// Process-local job store.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job record.
    pub fn insert(&self, job: Job) {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), job);
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_job(&self, id: &JobId) -> WorkerResult<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn update_job_status(
        &self,
        id: &JobId,
        status: JobStatus,
        update: StatusUpdate,
    ) -> WorkerResult<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| WorkerError::JobNotFound(id.to_string()))?;

        job.status = status;
        if let Some(progress) = update.progress {
            job.progress = progress.clamp(0.0, 100.0);
        }
        if let Some(path) = update.result_path {
            job.result_path = Some(path);
        }
        if let Some(info) = update.source_info {
            job.source_info = Some(info);
        }
        match status {
            JobStatus::Failed => job.error_message = update.error_message,
            _ => job.error_message = None,
        }
        job.updated_at = Utc::now();
        Ok(())
    }
}
