//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(#[from] vart_models::ParamsError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Processing panicked: {0}")]
    Panicked(String),

    #[error("Media error: {0}")]
    Media(#[from] vart_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Bad input (unknown style, empty range, missing source, invalid
    /// parameters) fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(e) => !e.is_permanent(),
            WorkerError::JobFailed(_)
            | WorkerError::Store(_)
            | WorkerError::Panicked(_)
            | WorkerError::Io(_) => true,
            WorkerError::JobNotFound(_)
            | WorkerError::InvalidParams(_)
            | WorkerError::ConfigError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vart_media::MediaError;

    #[test]
    fn test_retryable_classification() {
        let writer = MediaError::chunk_failed(
            0,
            MediaError::WriterUnavailable {
                attempted: vec!["libx264 (.mp4)".into()],
            },
        );
        assert!(WorkerError::from(writer).is_retryable());
        assert!(WorkerError::Panicked("boom".into()).is_retryable());

        assert!(!WorkerError::from(MediaError::UnknownStyle("neon".into())).is_retryable());
        assert!(!WorkerError::from(MediaError::invalid_range("0 frames")).is_retryable());
        assert!(!WorkerError::JobNotFound("x".into()).is_retryable());
    }
}
