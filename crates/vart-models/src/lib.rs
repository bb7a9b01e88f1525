//! Shared data models for the video art styling pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their persisted status
//! - Art style identifiers
//! - Crop, trim and resize parameters
//! - Progress records consumed by status pollers

pub mod geometry;
pub mod job;
pub mod progress;
pub mod style;

// Re-export common types
pub use geometry::{CropRect, FrameSpan, ResizeTarget, TrimWindow};
pub use job::{Job, JobId, JobStatus, ParamsError, ProcessingParams, SourceInfo};
pub use progress::{ProgressRecord, ProgressStatus};
pub use style::{StyleId, StyleParseError};
