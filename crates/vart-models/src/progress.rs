//! Live progress records for status polling.
//!
//! A `ProgressRecord` is the latest known state of a running job. Records are
//! replaced wholesale on every transition so readers never observe a
//! half-updated record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Processing state as seen by pollers.
///
/// `Starting` is the initial state; `Completed` and `Failed` are terminal.
/// `Retrying` loops back to `Starting` for the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Starting,
    Processing,
    Retrying,
    Finalizing,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Starting => "starting",
            ProgressStatus::Processing => "processing",
            ProgressStatus::Retrying => "retrying",
            ProgressStatus::Finalizing => "finalizing",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Failed)
    }

    /// States that begin a new attempt and reset progress to zero.
    pub fn resets_progress(&self) -> bool {
        matches!(self, ProgressStatus::Starting | ProgressStatus::Retrying)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ProgressStatus) -> bool {
        use ProgressStatus::*;
        match (self, next) {
            (Starting, Processing | Retrying | Failed) => true,
            (Processing, Processing | Finalizing | Retrying | Failed) => true,
            (Finalizing, Completed | Retrying | Failed) => true,
            (Retrying, Starting | Failed) => true,
            // A new run of the same job id starts over.
            (Completed | Failed, Starting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Latest known state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressRecord {
    pub job_id: JobId,
    pub status: ProgressStatus,
    /// Progress percentage (0-100)
    pub progress: f32,
    /// Human-readable description of the current step
    pub message: String,
    /// When the record was written
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(
        job_id: JobId,
        status: ProgressStatus,
        progress: f32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            status,
            progress: progress.clamp(0.0, 100.0),
            message: message.into(),
            updated_at: Utc::now(),
        }
    }

    /// Initial record for a new attempt.
    pub fn starting(job_id: JobId) -> Self {
        Self::new(job_id, ProgressStatus::Starting, 0.0, "Initializing processing...")
    }

    pub fn completed(job_id: JobId) -> Self {
        Self::new(
            job_id,
            ProgressStatus::Completed,
            100.0,
            "Processing completed successfully!",
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
