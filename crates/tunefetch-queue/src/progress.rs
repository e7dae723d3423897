//! Progress events via pub/sub.
//!
//! Delivery is fire-and-forget: a subscriber only sees events published
//! after it subscribed, and nothing is retained for late subscribers.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use tunefetch_models::{JobId, ProgressEvent};

use crate::error::{QueueError, QueueResult};

/// Stream of events for one job. Ends when the underlying subscription is lost.
pub type EventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Per-job topic pub/sub.
#[async_trait]
pub trait ProgressBus: Send + Sync {
    /// Publish an event on the job's topic. Returns the number of receivers.
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<usize>;

    /// Subscribe to the job's topic.
    async fn subscribe(&self, job_id: &JobId) -> QueueResult<EventStream>;
}

/// Redis Pub/Sub implementation.
pub struct RedisProgressBus {
    client: redis::Client,
    prefix: String,
}

impl RedisProgressBus {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    /// Get the topic name for a job.
    pub fn topic(&self, job_id: &JobId) -> String {
        format!("{}:progress:{}", self.prefix, job_id)
    }
}

#[async_trait]
impl ProgressBus for RedisProgressBus {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<usize> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::store_unavailable(e.to_string()))?;
        let topic = self.topic(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing progress event to {}", topic);
        let receivers: usize = conn.publish(topic, payload).await?;

        Ok(receivers)
    }

    async fn subscribe(&self, job_id: &JobId) -> QueueResult<EventStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| QueueError::store_unavailable(e.to_string()))?;
        let topic = self.topic(job_id);

        pubsub.subscribe(&topic).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            match serde_json::from_str(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Ignoring malformed progress message: {}", e);
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// In-process implementation over broadcast channels.
pub struct MemoryProgressBus {
    topics: Mutex<HashMap<JobId, broadcast::Sender<ProgressEvent>>>,
    available: AtomicBool,
    capacity: usize,
}

impl Default for MemoryProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProgressBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            capacity: 256,
        }
    }

    /// Toggle availability. While unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop all topics, ending every open subscription.
    pub fn disconnect_all(&self) {
        if let Ok(mut topics) = self.topics.lock() {
            topics.clear();
        }
    }

    fn check(&self) -> QueueResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::store_unavailable("progress bus offline"))
        }
    }
}

#[async_trait]
impl ProgressBus for MemoryProgressBus {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<usize> {
        self.check()?;
        let topics = self
            .topics
            .lock()
            .map_err(|_| QueueError::store_unavailable("progress bus poisoned"))?;

        Ok(topics
            .get(&event.job_id)
            .and_then(|tx| tx.send(event.clone()).ok())
            .unwrap_or(0))
    }

    async fn subscribe(&self, job_id: &JobId) -> QueueResult<EventStream> {
        self.check()?;
        let rx = {
            let mut topics = self
                .topics
                .lock()
                .map_err(|_| QueueError::store_unavailable("progress bus poisoned"))?;
            topics
                .entry(job_id.clone())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Progress subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Publishing handle for the scheduler.
///
/// Publish failures are logged and swallowed; progress is best effort.
#[derive(Clone)]
pub struct ProgressPublisher {
    bus: Arc<dyn ProgressBus>,
}

impl ProgressPublisher {
    pub fn new(bus: Arc<dyn ProgressBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<dyn ProgressBus> {
        &self.bus
    }

    pub async fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.bus.publish(&event).await {
            warn!(
                job_id = %event.job_id,
                event_type = event.event_type.as_str(),
                "Failed to publish progress event: {}",
                e
            );
        }
    }
}
