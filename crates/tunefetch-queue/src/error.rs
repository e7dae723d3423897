//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store could not be reached. Callers skip and retry later.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored entry could not be parsed. Carries the raw value so the
    /// caller can remove it from its collection.
    #[error("Corrupt record in {collection}: {reason}")]
    CorruptRecord {
        collection: String,
        raw: String,
        reason: String,
    },

    #[error("Index {index} out of range for {list}")]
    IndexOutOfRange { list: String, index: isize },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn corrupt(
        collection: impl Into<String>,
        raw: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::CorruptRecord {
            collection: collection.into(),
            raw: raw.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the failure is about reaching the store rather than its data.
    pub fn is_unavailable(&self) -> bool {
        match self {
            QueueError::StoreUnavailable(_) => true,
            QueueError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout()
            }
            _ => false,
        }
    }
}
