//! Redis-backed job queue with progress pub/sub.
//!
//! This crate provides:
//! - Durable pending/completed/failed job collections
//! - Head-of-queue claiming with compare-and-set
//! - Retry, stale recovery and retention bookkeeping
//! - Progress events via Redis Pub/Sub and the subscription frame protocol

pub mod backend;
pub mod error;
pub mod progress;
pub mod queue;
pub mod store;
pub mod subscription;

pub use backend::{MemoryBackend, RedisBackend, StoreBackend};
pub use error::{QueueError, QueueResult};
pub use progress::{
    EventStream, MemoryProgressBus, ProgressBus, ProgressPublisher, RedisProgressBus,
};
pub use queue::{
    ClaimOutcome, ClaimedJob, EnqueueDisposition, EnqueueOutcome, FailureOutcome, JobQueue,
    QueueConfig, RetentionReport,
};
pub use store::{Collection, JobStore, StoreKeys, StoredJob};
pub use subscription::{subscribe_stream, CloseReason, SubscriptionConfig};
