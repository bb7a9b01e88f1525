//! Worker health report.

use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use vart_media::{check_ffmpeg, check_ffprobe, EffectRegistry, MediaIo};

use crate::progress::ProgressStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    /// Jobs still run, on fallback paths
    Degraded,
    /// Jobs cannot run
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub version: String,
    pub timestamp: String,
    pub ffmpeg: CheckStatus,
    pub ffprobe: CheckStatus,
    pub work_dir: CheckStatus,
    pub active_jobs: usize,
    pub progress_entries: usize,
    pub styles: Vec<String>,
    pub writers: Vec<String>,
}

/// Check external tools and the work directory.
///
/// Missing FFmpeg only degrades the worker: the pure-Rust writer and the
/// re-encode concat path still produce output. An unusable work directory
/// or an empty writer list makes it unhealthy.
pub async fn check(
    work_dir: &Path,
    progress: &ProgressStore,
    effects: &EffectRegistry,
    io: &MediaIo,
) -> HealthReport {
    let ffmpeg = match check_ffmpeg() {
        Ok(_) => CheckStatus::ok(),
        Err(e) => CheckStatus::error(e.to_string()),
    };
    let ffprobe = match check_ffprobe() {
        Ok(_) => CheckStatus::ok(),
        Err(e) => CheckStatus::error(e.to_string()),
    };
    let work_dir = check_work_dir(work_dir).await;
    let writers = io.writer_labels();

    let status = if !work_dir.is_ok() || writers.is_empty() {
        HealthLevel::Unhealthy
    } else if !ffmpeg.is_ok() || !ffprobe.is_ok() {
        HealthLevel::Degraded
    } else {
        HealthLevel::Healthy
    };

    HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        ffmpeg,
        ffprobe,
        work_dir,
        active_jobs: progress.active_count(),
        progress_entries: progress.len(),
        styles: effects.styles(),
        writers,
    }
}

async fn check_work_dir(dir: &Path) -> CheckStatus {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        return CheckStatus::error(format!("{}: {}", dir.display(), e));
    }
    let probe = dir.join(".health");
    match tokio::fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            CheckStatus::ok()
        }
        Err(e) => CheckStatus::error(format!("{} is not writable: {}", dir.display(), e)),
    }
}
