//! Structured job logging.

use std::fmt::Display;
use std::path::Path;

use tracing::{debug, error, info, warn, Span};
use vart_models::{Job, JobId};

/// Lifecycle events for one styling job.
///
/// Every event carries `job_id` and `style`, so a job's history can be pulled
/// out of interleaved worker logs with a single filter.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    style: String,
}

impl JobLogger {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            style: job.style().to_string(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn style(&self) -> &str {
        &self.style
    }

    pub fn started(&self, source: &Path, output: &Path, intensity: f32) {
        info!(
            job_id = %self.job_id,
            style = %self.style,
            source = %source.display(),
            output = %output.display(),
            intensity,
            "Styling job started"
        );
    }

    pub fn attempt_failed(&self, attempt: u32, max_attempts: u32, err: &dyn Display) {
        warn!(
            job_id = %self.job_id,
            style = %self.style,
            attempt,
            max_attempts,
            error = %err,
            "Attempt failed"
        );
    }

    pub fn salvaged(&self, strategy: &str) {
        warn!(
            job_id = %self.job_id,
            style = %self.style,
            strategy,
            "Output salvaged from a single chunk"
        );
    }

    pub fn completed(&self, output: &Path, bytes: u64, strategy: &str) {
        info!(
            job_id = %self.job_id,
            style = %self.style,
            output = %output.display(),
            bytes,
            strategy,
            "Styling job completed"
        );
    }

    pub fn failed(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            style = %self.style,
            "Styling job failed: {}", message
        );
    }

    pub fn evicted(&self, entries: usize) {
        debug!(job_id = %self.job_id, entries, "Evicted stale progress entries");
    }

    /// Span that chunk and concat events nest under.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, style = %self.style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vart_models::ProcessingParams;

    #[test]
    fn test_logger_takes_id_and_style_from_job() {
        let job = Job::new("in.y4m", "out.mp4", ProcessingParams::new("Oil Painting"))
            .with_id(JobId::from_string("job-123"));
        let logger = JobLogger::for_job(&job);

        assert_eq!(logger.job_id().as_str(), "job-123");
        assert_eq!(logger.style(), "oil_painting");
    }
}
