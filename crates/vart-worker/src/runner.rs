//! Job runner: plan, encode every chunk, concatenate, verify.
//!
//! States published to the progress store:
//!
//! ```text
//! Starting -> Processing -> Finalizing -> Completed
//!     |            |             |
//!     +------------+-------------+--> Retrying -> Starting (next attempt)
//!                                 \-> Failed
//! ```
//!
//! Every attempt starts from an empty chunk directory; nothing from a failed
//! attempt is reused. Errors and panics never escape [`JobRunner::run`]; the
//! caller observes outcomes only through the progress store, persistence and
//! the returned [`JobReport`].

use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};

use vart_media::{
    fs_utils, ChunkEncoder, ChunkPlanner, ChunkRequest, ConcatOutcome, Concatenator,
    EffectRegistry, MediaError, MediaIo,
};
use vart_models::{FrameSpan, Job, JobId, JobStatus, ProgressStatus, SourceInfo};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::progress::ProgressStore;
use crate::retry::{retry_async, RetryPolicy};
use crate::store::{JobStore, StatusUpdate};

/// Share of overall progress covered by chunk encoding.
const ENCODING_SPAN: f32 = 90.0;
const FINALIZING_PROGRESS: f32 = 95.0;

/// Outcome of one `run`.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    /// Terminal status written to persistence
    pub status: JobStatus,
    /// Attempts started (0 if the job was rejected up front)
    pub attempts: u32,
    /// Backoff waits between attempts, in order
    pub backoff_waits: Vec<Duration>,
    pub output_path: Option<PathBuf>,
    pub output_bytes: Option<u64>,
    /// Strategy that joined the chunks
    pub concat_strategy: Option<String>,
    /// Output is a single salvaged chunk rather than the whole video
    pub degraded: bool,
    pub error: Option<String>,
}

impl JobReport {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            attempts: 0,
            backoff_waits: Vec::new(),
            output_path: None,
            output_bytes: None,
            concat_strategy: None,
            degraded: false,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Result of one successful attempt.
struct AttemptOutput {
    outcome: ConcatOutcome,
    source_info: SourceInfo,
}

/// Runs styling jobs end to end.
#[derive(Clone)]
pub struct JobRunner {
    config: Arc<WorkerConfig>,
    store: Arc<dyn JobStore>,
    progress: ProgressStore,
    encoder: Arc<ChunkEncoder>,
    concatenator: Arc<Concatenator>,
    planner: ChunkPlanner,
    job_retry: RetryPolicy,
    store_retry: RetryPolicy,
    job_slots: Arc<Semaphore>,
}

impl JobRunner {
    /// Runner with the default backends and the built-in styles.
    pub fn new(config: WorkerConfig, store: Arc<dyn JobStore>, progress: ProgressStore) -> Self {
        let io = MediaIo::default_backends();
        let effects = Arc::new(EffectRegistry::with_builtin_styles());
        let encoder = ChunkEncoder::new(io.clone(), effects).with_batch_size(config.batch_size);
        let concatenator = Concatenator::default_chain(
            io,
            config.concat_timeout.as_secs(),
            config.concat_simple_timeout.as_secs(),
        );

        Self {
            planner: config.planner(),
            job_retry: config.job_retry(),
            store_retry: RetryPolicy::new("job_store").with_base_delay(Duration::from_millis(50)),
            job_slots: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config: Arc::new(config),
            store,
            progress,
            encoder: Arc::new(encoder),
            concatenator: Arc::new(concatenator),
        }
    }

    /// Replace frame I/O and styles; the concat chain is rebuilt on `io`.
    pub fn with_media(mut self, io: MediaIo, effects: Arc<EffectRegistry>) -> Self {
        self.encoder =
            Arc::new(ChunkEncoder::new(io.clone(), effects).with_batch_size(self.config.batch_size));
        self.concatenator = Arc::new(Concatenator::default_chain(
            io,
            self.config.concat_timeout.as_secs(),
            self.config.concat_simple_timeout.as_secs(),
        ));
        self
    }

    pub fn with_concatenator(mut self, concatenator: Concatenator) -> Self {
        self.concatenator = Arc::new(concatenator);
        self
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn effects(&self) -> &EffectRegistry {
        self.encoder.effects()
    }

    pub fn media_io(&self) -> &MediaIo {
        self.encoder.io()
    }

    /// Load a job from persistence and run it.
    pub async fn process(&self, id: &JobId) -> WorkerResult<JobReport> {
        let job = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| WorkerError::JobNotFound(id.to_string()))?;
        Ok(self.run(&job).await)
    }

    /// Run a job in the background, at most `max_concurrent_jobs` at a time.
    pub fn submit(&self, job: Job) -> JoinHandle<JobReport> {
        let runner = self.clone();
        tokio::spawn(async move {
            // A closed semaphore only means no limit is enforced any more.
            let _permit = runner.job_slots.clone().acquire_owned().await.ok();
            runner.run(&job).await
        })
    }

    /// Run a job to a terminal state.
    pub async fn run(&self, job: &Job) -> JobReport {
        let logger = JobLogger::for_job(job);
        let span = logger.span();
        self.run_logged(job, &logger).instrument(span).await
    }

    async fn run_logged(&self, job: &Job, logger: &JobLogger) -> JobReport {
        let started = Instant::now();
        let style = job.style().to_string();
        let mut report = JobReport::new(job.id.clone());

        let evicted = self.progress.evict_stale(self.config.progress_ttl);
        if evicted > 0 {
            logger.evicted(evicted);
        }
        self.progress.set_active(&job.id, true);
        self.progress
            .publish(vart_models::ProgressRecord::starting(job.id.clone()));
        logger.started(&job.source_path, &job.output_path, job.params.intensity);

        if let Err(e) = self.check_request(job) {
            self.fail(job, &mut report, logger, &e.to_string(), false).await;
            self.progress.set_active(&job.id, false);
            return report;
        }

        self.persist(&job.id, JobStatus::Processing, StatusUpdate::default())
            .await;

        let max_attempts = self.job_retry.max_attempts;
        let mut attempt = 1u32;
        let last_error = loop {
            report.attempts = attempt;
            crate::metrics::record_attempt(&style);
            if attempt > 1 {
                self.progress.update(
                    &job.id,
                    ProgressStatus::Starting,
                    0.0,
                    format!("Restarting processing (attempt {}/{})...", attempt, max_attempts),
                );
            }

            let result = AssertUnwindSafe(self.attempt(job, attempt))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(WorkerError::Panicked(panic_message(panic.as_ref()))));
            self.remove_attempt_dir(job, attempt).await;

            let error = match result {
                Ok(output) => {
                    self.complete(job, &mut report, logger, output, started).await;
                    self.cleanup_job_dir(job).await;
                    self.progress.set_active(&job.id, false);
                    return report;
                }
                Err(e) => e,
            };

            logger.attempt_failed(attempt, max_attempts, &error);
            if !error.is_retryable() || !self.job_retry.has_attempts_left(attempt) {
                break error;
            }

            let wait = self.job_retry.delay_for_attempt(attempt);
            report.backoff_waits.push(wait);
            crate::metrics::record_retry(&style);
            self.progress.update(
                &job.id,
                ProgressStatus::Retrying,
                0.0,
                format!(
                    "Attempt {} failed: {}. Retrying in {:.1}s...",
                    attempt,
                    error,
                    wait.as_secs_f64()
                ),
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        };

        let exhausted = last_error.is_retryable();
        let message = if exhausted {
            format!("Processing failed after {} attempts: {}", attempt, last_error)
        } else {
            last_error.to_string()
        };
        self.fail(job, &mut report, logger, &message, exhausted).await;
        self.cleanup_job_dir(job).await;
        self.progress.set_active(&job.id, false);
        report
    }

    /// Reject requests that cannot succeed on any attempt.
    fn check_request(&self, job: &Job) -> WorkerResult<()> {
        job.params.validate()?;
        self.encoder.effects().resolve(job.style())?;
        Ok(())
    }

    async fn attempt(&self, job: &Job, attempt: u32) -> WorkerResult<AttemptOutput> {
        let attempt_dir = self.config.attempt_dir(job.id.as_str(), attempt);
        reset_dir(&attempt_dir).await?;

        if !job.source_path.exists() {
            return Err(MediaError::FileNotFound(job.source_path.clone()).into());
        }

        let info = self.encoder.io().open_reader(&job.source_path, 0)?.info();
        let source_info = SourceInfo {
            fps: info.fps,
            total_frames: info.frame_count,
            width: info.width,
            height: info.height,
        };

        let span = match &job.params.trim {
            Some(trim) => trim.frame_span(info.fps, info.frame_count).ok_or_else(|| {
                MediaError::invalid_range(format!(
                    "trim window {:?} is empty for {} frames at {} fps",
                    trim, info.frame_count, info.fps
                ))
            })?,
            None => FrameSpan::new(0, info.frame_count),
        };
        let ranges = self.planner.plan_span(span)?;
        let total_frames = span.len() as f32;
        let chunk_count = ranges.len();

        self.progress.update(
            &job.id,
            ProgressStatus::Processing,
            0.0,
            format!("Processing {} frames in {} chunks...", span.len(), chunk_count),
        );

        let mut chunks = Vec::with_capacity(chunk_count);
        let mut frames_before = 0u64;
        for range in ranges {
            let request = ChunkRequest {
                job_id: job.id.clone(),
                source: job.source_path.clone(),
                output_stem: attempt_dir.join(format!("{}_chunk_{:03}", job.id, range.index)),
                range,
                style: job.style().clone(),
                intensity: job.params.intensity,
                crop: job.params.crop,
                resize: job.params.resize,
            };

            let base = frames_before as f32 / total_frames * ENCODING_SPAN;
            let share = range.len() as f32 / total_frames * ENCODING_SPAN;
            let progress = &self.progress;
            let job_id = &job.id;
            let encoded = self
                .encoder
                .encode(&request, |p| {
                    progress.update(
                        job_id,
                        ProgressStatus::Processing,
                        base + share * p.percent / 100.0,
                        format!(
                            "Processing chunk {}/{} ({}/{} frames)",
                            p.chunk + 1,
                            chunk_count,
                            p.frames_done,
                            p.frames_requested
                        ),
                    );
                })
                .await;
            let output = match encoded {
                Ok(output) => output,
                // The reported frame count overshot the source.
                Err(MediaError::EndOfStream { chunk, start }) if !chunks.is_empty() => {
                    warn!(chunk, start, "Source ended at a chunk boundary, skipping remaining chunks");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            frames_before += range.len();
            let partial = output.is_partial();
            if partial {
                warn!(
                    chunk = output.index,
                    frames = output.frames,
                    requested = output.frames_requested,
                    "Source ended early, skipping remaining chunks"
                );
            }
            chunks.push(output.path);
            if partial {
                break;
            }
        }

        self.progress.update(
            &job.id,
            ProgressStatus::Finalizing,
            FINALIZING_PROGRESS,
            "Combining chunks...",
        );
        if let Some(parent) = job.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let outcome = self.concatenator.concatenate(&chunks, &job.output_path).await?;
        self.verify_output(&outcome).await?;

        Ok(AttemptOutput {
            outcome,
            source_info,
        })
    }

    /// A completed job must point at a real, non-trivial file.
    async fn verify_output(&self, outcome: &ConcatOutcome) -> WorkerResult<()> {
        let bytes = fs_utils::file_size(&outcome.path).await;
        if bytes <= self.config.min_output_bytes {
            let _ = tokio::fs::remove_file(&outcome.path).await;
            return Err(MediaError::output_verification(format!(
                "{} is {} bytes, expected more than {}",
                outcome.path.display(),
                bytes,
                self.config.min_output_bytes
            ))
            .into());
        }
        Ok(())
    }

    async fn complete(
        &self,
        job: &Job,
        report: &mut JobReport,
        logger: &JobLogger,
        output: AttemptOutput,
        started: Instant,
    ) {
        let outcome = output.outcome;
        if outcome.degraded {
            logger.salvaged(&outcome.strategy);
        }

        self.persist(
            &job.id,
            JobStatus::Completed,
            StatusUpdate::completed(outcome.path.clone(), Some(output.source_info)),
        )
        .await;
        self.progress
            .publish(vart_models::ProgressRecord::completed(job.id.clone()));

        crate::metrics::record_completed(
            job.style().as_str(),
            outcome.degraded,
            started.elapsed().as_secs_f64(),
        );
        logger.completed(&outcome.path, outcome.bytes, &outcome.strategy);

        report.status = JobStatus::Completed;
        report.output_path = Some(outcome.path);
        report.output_bytes = Some(outcome.bytes);
        report.concat_strategy = Some(outcome.strategy);
        report.degraded = outcome.degraded;
    }

    async fn fail(
        &self,
        job: &Job,
        report: &mut JobReport,
        logger: &JobLogger,
        message: &str,
        retryable: bool,
    ) {
        logger.failed(message);
        self.progress
            .update(&job.id, ProgressStatus::Failed, 0.0, message.to_string());
        self.persist(&job.id, JobStatus::Failed, StatusUpdate::failed(message))
            .await;
        crate::metrics::record_failed(job.style().as_str(), retryable);

        report.status = JobStatus::Failed;
        report.error = Some(message.to_string());
    }

    /// Write a status change, retrying briefly. Persistence problems are
    /// logged and never fail the job.
    async fn persist(&self, id: &JobId, status: JobStatus, update: StatusUpdate) {
        let result = retry_async(&self.store_retry, || {
            self.store.update_job_status(id, status, update.clone())
        })
        .await;
        if let Err(e) = result {
            warn!(job_id = %id, status = %status, "Failed to persist job status: {}", e);
        }
    }

    async fn remove_attempt_dir(&self, job: &Job, attempt: u32) {
        let dir = self.config.attempt_dir(job.id.as_str(), attempt);
        remove_dir(&dir).await;
    }

    async fn cleanup_job_dir(&self, job: &Job) {
        remove_dir(&self.config.job_dir(job.id.as_str())).await;
    }
}

async fn reset_dir(dir: &Path) -> WorkerResult<()> {
    remove_dir(dir).await;
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
