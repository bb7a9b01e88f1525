//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid frame range: {0}")]
    InvalidRange(String),

    #[error("No writer could be opened (tried: {})", attempted.join(", "))]
    WriterUnavailable { attempted: Vec<String> },

    #[error("Chunk {chunk} failed: {source}")]
    ChunkProcessing {
        chunk: usize,
        #[source]
        source: Box<MediaError>,
    },

    /// The source has no frames at or after `start`; its reported frame
    /// count was too high.
    #[error("Source ended before frame {start} (chunk {chunk})")]
    EndOfStream { chunk: usize, start: u64 },

    #[error("Concatenation failed: {0}")]
    Concatenation(String),

    #[error("Output verification failed: {0}")]
    OutputVerification(String),

    #[error("Unknown style: {0}")]
    UnknownStyle(String),

    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Wrap an error raised while encoding chunk `chunk`.
    pub fn chunk_failed(chunk: usize, source: MediaError) -> Self {
        Self::ChunkProcessing {
            chunk,
            source: Box::new(source),
        }
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::InvalidRange(message.into())
    }

    pub fn concatenation(message: impl Into<String>) -> Self {
        Self::Concatenation(message.into())
    }

    pub fn output_verification(message: impl Into<String>) -> Self {
        Self::OutputVerification(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors that no amount of retrying will fix.
    pub fn is_permanent(&self) -> bool {
        match self {
            MediaError::InvalidRange(_)
            | MediaError::UnknownStyle(_)
            | MediaError::FileNotFound(_) => true,
            MediaError::ChunkProcessing { source, .. } => source.is_permanent(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        assert!(MediaError::invalid_range("0 frames").is_permanent());
        assert!(MediaError::UnknownStyle("neon".into()).is_permanent());
        assert!(!MediaError::Timeout(300).is_permanent());
        assert!(!MediaError::WriterUnavailable { attempted: vec![] }.is_permanent());
    }

    #[test]
    fn test_chunk_error_wraps_source() {
        let err = MediaError::chunk_failed(2, MediaError::FileNotFound("a.mp4".into()));
        assert!(err.is_permanent());
        assert!(err.to_string().contains("Chunk 2"));
    }

    #[test]
    fn test_end_of_stream_is_not_permanent() {
        let err = MediaError::EndOfStream { chunk: 3, start: 60 };
        assert!(!err.is_permanent());
        assert_eq!(err.to_string(), "Source ended before frame 60 (chunk 3)");
    }

    #[test]
    fn test_writer_unavailable_lists_attempts() {
        let err = MediaError::WriterUnavailable {
            attempted: vec!["libx264 (.mp4)".into(), "y4m (.y4m)".into()],
        };
        assert_eq!(
            err.to_string(),
            "No writer could be opened (tried: libx264 (.mp4), y4m (.y4m))"
        );
    }
}
