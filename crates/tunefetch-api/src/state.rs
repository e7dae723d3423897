//! Application state.

use std::sync::Arc;

use tunefetch_queue::{JobQueue, ProgressBus, QueueConfig, RedisProgressBus};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub queue: JobQueue,
    pub bus: Arc<dyn ProgressBus>,
}

impl AppState {
    /// Connect to Redis with the given configs.
    pub fn connect(config: ApiConfig, queue_config: QueueConfig) -> anyhow::Result<Self> {
        let bus = RedisProgressBus::new(&queue_config.redis_url, queue_config.key_prefix.clone())?;
        let queue = JobQueue::connect(queue_config)?;

        Ok(Self::new(config, queue, Arc::new(bus)))
    }

    pub fn new(config: ApiConfig, queue: JobQueue, bus: Arc<dyn ProgressBus>) -> Self {
        Self {
            config: Arc::new(config),
            queue,
            bus,
        }
    }
}
