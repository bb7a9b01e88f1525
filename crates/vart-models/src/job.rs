//! Job definitions for video styling requests.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::{CropRect, ResizeTarget, StyleId, TrimWindow};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Source uploaded, not yet processed
    #[default]
    Uploaded,
    /// A worker is processing the job
    Processing,
    /// Output file is ready
    Completed,
    /// Processing failed after all attempts
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters chosen by the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingParams {
    /// Art style to apply
    pub style: StyleId,

    /// Blend factor between original (0.0) and full effect (1.0)
    #[serde(default = "default_intensity")]
    pub intensity: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRect>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim: Option<TrimWindow>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeTarget>,
}

fn default_intensity() -> f32 {
    0.5
}

impl ProcessingParams {
    /// Parameters for a style with default intensity and no geometry changes.
    pub fn new(style: impl Into<StyleId>) -> Self {
        Self {
            style: style.into(),
            intensity: default_intensity(),
            crop: None,
            trim: None,
            resize: None,
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_trim(mut self, trim: TrimWindow) -> Self {
        self.trim = Some(trim);
        self
    }

    pub fn with_resize(mut self, resize: ResizeTarget) -> Self {
        self.resize = Some(resize);
        self
    }

    /// Check request-level constraints.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if !(0.0..=1.0).contains(&self.intensity) {
            return Err(ParamsError::IntensityOutOfRange(self.intensity));
        }
        if let Some(resize) = &self.resize {
            if !resize.is_valid() {
                return Err(ParamsError::InvalidResize {
                    width: resize.width,
                    height: resize.height,
                });
            }
        }
        if let Some(trim) = &self.trim {
            if let Some(end) = trim.end_time {
                if end <= trim.start_time {
                    return Err(ParamsError::EmptyTrim);
                }
            }
        }
        Ok(())
    }
}

/// Parameter validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("Intensity must be within 0.0..=1.0, got {0}")]
    IntensityOutOfRange(f32),

    #[error("Resize target must be non-zero, got {width}x{height}")]
    InvalidResize { width: u32, height: u32 },

    #[error("Trim window end must be after its start")]
    EmptyTrim,
}

/// Source properties discovered when the video is opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceInfo {
    pub fps: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
}

impl SourceInfo {
    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.total_frames as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// A video styling job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Uploaded source video
    pub source_path: PathBuf,

    /// Requested output location
    pub output_path: PathBuf,

    /// Style and geometry parameters
    pub params: ProcessingParams,

    /// Persisted status
    #[serde(default)]
    pub status: JobStatus,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: f32,

    /// Source properties, filled in once the source is opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,

    /// Final output file (may differ in extension from `output_path`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<PathBuf>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job for an uploaded source.
    pub fn new(
        source_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        params: ProcessingParams,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source_path: source_path.into(),
            output_path: output_path.into(),
            params,
            status: JobStatus::Uploaded,
            progress: 0.0,
            source_info: None,
            result_path: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Use a specific job ID.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn style(&self) -> &StyleId {
        &self.params.style
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_creation() {
        let job = Job::new("in.mp4", "out.mp4", ProcessingParams::new("pencil"));
        assert_eq!(job.status, JobStatus::Uploaded);
        assert_eq!(job.style().as_str(), "pencil");
        assert!(!job.is_terminal());
        assert!(!job.id.as_str().is_empty());
    }

    #[test]
    fn test_params_validation() {
        assert!(ProcessingParams::new("pencil").validate().is_ok());
        assert_eq!(
            ProcessingParams::new("pencil").with_intensity(1.5).validate(),
            Err(ParamsError::IntensityOutOfRange(1.5))
        );
        assert!(ProcessingParams::new("pencil")
            .with_resize(ResizeTarget::new(0, 100))
            .validate()
            .is_err());
        assert_eq!(
            ProcessingParams::new("pencil")
                .with_trim(TrimWindow::new(3.0, Some(1.0)))
                .validate(),
            Err(ParamsError::EmptyTrim)
        );
    }

    #[test]
    fn test_params_deserialize_defaults() {
        let params: ProcessingParams =
            serde_json::from_str(r#"{"style":"cartoon","crop":{"x":0,"y":0,"width":10,"height":10}}"#)
                .unwrap();
        assert_eq!(params.intensity, 0.5);
        assert_eq!(params.crop, Some(CropRect::new(0, 0, 10, 10)));
        assert!(params.trim.is_none());
    }

    #[test]
    fn test_job_status_strings() {
        assert_eq!(JobStatus::Uploaded.as_str(), "uploaded");
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
