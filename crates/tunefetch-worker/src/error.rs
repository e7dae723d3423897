//! Worker error types.

use thiserror::Error;

use crate::fetcher::FetchError;
use crate::provider::MetadataError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The job URL does not name a supported catalog object.
    #[error("Invalid URL: {0}")]
    Validation(String),

    #[error("Metadata lookup failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Queue error: {0}")]
    Queue(#[from] tunefetch_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if error is retryable at job granularity.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::Metadata(_) | WorkerError::Fetch(_) | WorkerError::Io(_)
        )
    }

    /// Check if this is a permanent failure that should NOT be retried.
    ///
    /// Only a malformed job is permanent: the same URL fails the same way on
    /// every attempt.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, WorkerError::Validation(_))
    }

    /// Store could not be reached; the tick is skipped.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, WorkerError::Queue(e) if e.is_unavailable())
    }
}
