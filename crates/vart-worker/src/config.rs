//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vart_media::ChunkPlanner;

use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root for per-job chunk directories
    pub work_dir: PathBuf,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Whole-job attempts before a job is marked failed
    pub max_attempts: u32,
    /// Backoff base; the wait after attempt `n` is `base * 2^n`
    pub backoff_base: Duration,
    /// Chunks the planner aims for
    pub chunk_target: u64,
    /// Lower bound on frames per chunk
    pub chunk_min: u64,
    /// Upper bound on frames per chunk
    pub chunk_max: u64,
    /// Frames read between progress reports
    pub batch_size: usize,
    /// Timeout for the re-encoding FFmpeg concat
    pub concat_timeout: Duration,
    /// Timeout for the stream-copy FFmpeg concat retry
    pub concat_simple_timeout: Duration,
    /// Finished videos must be larger than this many bytes
    pub min_output_bytes: u64,
    /// Age after which finished progress entries are evicted
    pub progress_ttl: Duration,
    /// How often the progress sweeper runs
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("vart"),
            max_concurrent_jobs: 2,
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            chunk_target: 8,
            chunk_min: 50,
            chunk_max: 300,
            batch_size: 5,
            concat_timeout: Duration::from_secs(300),
            concat_simple_timeout: Duration::from_secs(180),
            min_output_bytes: 1000,
            progress_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("VART_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_concurrent_jobs: env_or("VART_MAX_JOBS", defaults.max_concurrent_jobs),
            max_attempts: env_or("VART_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_base: Duration::from_millis(env_or("VART_BACKOFF_BASE_MS", 1000)),
            chunk_target: env_or("VART_CHUNK_TARGET", defaults.chunk_target),
            chunk_min: env_or("VART_CHUNK_MIN", defaults.chunk_min),
            chunk_max: env_or("VART_CHUNK_MAX", defaults.chunk_max),
            batch_size: env_or("VART_BATCH_SIZE", defaults.batch_size),
            concat_timeout: Duration::from_secs(env_or("VART_CONCAT_TIMEOUT_SECS", 300)),
            concat_simple_timeout: Duration::from_secs(env_or(
                "VART_CONCAT_SIMPLE_TIMEOUT_SECS",
                180,
            )),
            min_output_bytes: env_or("VART_MIN_OUTPUT_BYTES", defaults.min_output_bytes),
            progress_ttl: Duration::from_secs(env_or("VART_PROGRESS_TTL_SECS", 3600)),
            sweep_interval: Duration::from_secs(env_or("VART_SWEEP_INTERVAL_SECS", 300)),
        }
    }

    pub fn planner(&self) -> ChunkPlanner {
        ChunkPlanner::new(self.chunk_target, self.chunk_min, self.chunk_max)
    }

    /// Backoff policy for whole-job retries.
    pub fn job_retry(&self) -> RetryPolicy {
        RetryPolicy::new("job")
            .with_max_attempts(self.max_attempts)
            .with_base_delay(self.backoff_base)
    }

    /// Chunk directory for one attempt of a job.
    pub fn attempt_dir(&self, job_id: &str, attempt: u32) -> PathBuf {
        self.job_dir(job_id).join(format!("attempt-{}", attempt))
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.work_dir.join(job_id)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
