//! Job-level metrics.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding process.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOB_ATTEMPTS_TOTAL: &str = "vart_job_attempts_total";
    pub const JOB_RETRIES_TOTAL: &str = "vart_job_retries_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vart_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vart_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "vart_job_duration_seconds";
    pub const PROGRESS_ENTRIES: &str = "vart_progress_entries";
    pub const PROGRESS_EVICTED_TOTAL: &str = "vart_progress_evicted_total";
}

pub fn record_attempt(style: &str) {
    let labels = [("style", style.to_string())];
    counter!(names::JOB_ATTEMPTS_TOTAL, &labels).increment(1);
}

pub fn record_retry(style: &str) {
    let labels = [("style", style.to_string())];
    counter!(names::JOB_RETRIES_TOTAL, &labels).increment(1);
}

pub fn record_completed(style: &str, degraded: bool, duration_secs: f64) {
    let labels = [
        ("style", style.to_string()),
        ("degraded", degraded.to_string()),
    ];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_failed(style: &str, retryable: bool) {
    let labels = [
        ("style", style.to_string()),
        ("retryable", retryable.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_progress_entries(count: usize) {
    gauge!(names::PROGRESS_ENTRIES).set(count as f64);
}

pub fn record_evicted(count: usize) {
    counter!(names::PROGRESS_EVICTED_TOTAL).increment(count as u64);
}
