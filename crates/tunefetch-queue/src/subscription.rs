//! Live progress subscription for one job.
//!
//! Frame order: a `connected` handshake, then every event published after the
//! subscription was established, with heartbeats while idle. The stream ends
//! once: shortly after a terminal event, when the bus subscription is lost, or
//! when the consumer goes away. If the bus cannot be reached a single polling
//! fallback frame is emitted instead.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use tunefetch_models::{ControlFrame, JobId, StreamFrame};

use crate::progress::ProgressBus;

const SEND_BUFFER_SIZE: usize = 32;

/// Subscription timing.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionConfig {
    /// Idle time before a heartbeat frame is sent
    pub heartbeat: Duration,
    /// Delay between a terminal event and closing the stream
    pub close_grace: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            close_grace: Duration::from_millis(1000),
        }
    }
}

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Terminal,
    BusLost,
    ConsumerGone,
    Fallback,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Terminal => "terminal",
            CloseReason::BusLost => "bus_lost",
            CloseReason::ConsumerGone => "consumer_gone",
            CloseReason::Fallback => "fallback",
        }
    }
}

/// Open a subscription stream for `job_id`.
///
/// The bus subscription is driven by a background task; dropping the returned
/// stream stops it.
pub fn subscribe_stream(
    bus: Arc<dyn ProgressBus>,
    job_id: JobId,
    config: SubscriptionConfig,
) -> impl Stream<Item = StreamFrame> + Send + 'static {
    let (tx, rx) = mpsc::channel::<StreamFrame>(SEND_BUFFER_SIZE);

    tokio::spawn(async move {
        let reason = pump(bus, &job_id, config, tx).await;
        info!(job_id = %job_id, reason = reason.as_str(), "Progress subscription closed");
    });

    futures_util::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((frame, rx))
    })
}

async fn pump(
    bus: Arc<dyn ProgressBus>,
    job_id: &JobId,
    config: SubscriptionConfig,
    tx: mpsc::Sender<StreamFrame>,
) -> CloseReason {
    let mut events = match bus.subscribe(job_id).await {
        Ok(events) => events,
        Err(e) => {
            warn!(job_id = %job_id, "Progress bus unavailable, advising polling: {}", e);
            let frame = ControlFrame::polling_fallback(job_id, e.to_string());
            let _ = tx.send(StreamFrame::Control(frame)).await;
            return CloseReason::Fallback;
        }
    };

    if tx.send(StreamFrame::Control(ControlFrame::connected(job_id))).await.is_err() {
        return CloseReason::ConsumerGone;
    }

    let heartbeat = sleep(config.heartbeat);
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    return CloseReason::BusLost;
                };
                let terminal = event.is_terminal();
                if tx.send(StreamFrame::Event(event)).await.is_err() {
                    return CloseReason::ConsumerGone;
                }
                if terminal {
                    debug!(
                        job_id = %job_id,
                        "Terminal event forwarded, closing after grace period"
                    );
                    tokio::select! {
                        _ = sleep(config.close_grace) => {}
                        _ = tx.closed() => return CloseReason::ConsumerGone,
                    }
                    return CloseReason::Terminal;
                }
                heartbeat.as_mut().reset(Instant::now() + config.heartbeat);
            }
            _ = &mut heartbeat => {
                if tx.send(StreamFrame::Heartbeat).await.is_err() {
                    return CloseReason::ConsumerGone;
                }
                heartbeat.as_mut().reset(Instant::now() + config.heartbeat);
            }
            _ = tx.closed() => return CloseReason::ConsumerGone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MemoryProgressBus;
    use tunefetch_models::{ControlFrame, ProgressEvent, ProgressEventType};

    fn config() -> SubscriptionConfig {
        SubscriptionConfig::default()
    }

    async fn expect_connected(stream: &mut (impl Stream<Item = StreamFrame> + Unpin)) {
        match stream.next().await {
            Some(StreamFrame::Control(ControlFrame::Connected { .. })) => {}
            other => panic!("expected handshake, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_then_close_after_grace() {
        let bus = Arc::new(MemoryProgressBus::new());
        let job_id = JobId::new();
        let mut stream = Box::pin(subscribe_stream(bus.clone(), job_id.clone(), config()));
        expect_connected(&mut stream).await;

        bus.publish(&ProgressEvent::downloading(&job_id, "Song - Artist", 0, 1)).await.unwrap();
        bus.publish(&ProgressEvent::completed(&job_id, "Song - Artist")).await.unwrap();

        match stream.next().await {
            Some(StreamFrame::Event(e)) => assert_eq!(e.event_type, ProgressEventType::Downloading),
            other => panic!("unexpected frame {:?}", other),
        }
        let terminal_at = Instant::now();
        match stream.next().await {
            Some(StreamFrame::Event(e)) => assert_eq!(e.event_type, ProgressEventType::Completed),
            other => panic!("unexpected frame {:?}", other),
        }

        assert!(stream.next().await.is_none());
        assert!(Instant::now() - terminal_at >= Duration::from_millis(1000));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_gets_no_replay() {
        let bus = Arc::new(MemoryProgressBus::new());
        let job_id = JobId::new();
        bus.publish(&ProgressEvent::completed(&job_id, "x")).await.unwrap();

        let mut stream = Box::pin(subscribe_stream(bus.clone(), job_id, config()));
        expect_connected(&mut stream).await;

        let started = Instant::now();
        assert!(matches!(stream.next().await, Some(StreamFrame::Heartbeat)));
        assert!(Instant::now() - started >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_only_while_idle() {
        let bus = Arc::new(MemoryProgressBus::new());
        let job_id = JobId::new();
        let mut stream = Box::pin(subscribe_stream(bus.clone(), job_id.clone(), config()));
        expect_connected(&mut stream).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        bus.publish(&ProgressEvent::info(&job_id, "Album", "Found 3 tracks", 3)).await.unwrap();
        assert!(matches!(stream.next().await, Some(StreamFrame::Event(_))));

        // The idle timer restarted with the event.
        let after_event = Instant::now();
        assert!(matches!(stream.next().await, Some(StreamFrame::Heartbeat)));
        assert!(Instant::now() - after_event >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_unavailable_falls_back_to_polling() {
        let bus = Arc::new(MemoryProgressBus::new());
        bus.set_available(false);
        let job_id = JobId::new();

        let mut stream = Box::pin(subscribe_stream(bus, job_id.clone(), config()));
        match stream.next().await {
            Some(StreamFrame::Control(ControlFrame::Fallback { job_id: id, mode, .. })) => {
                assert_eq!(id, job_id);
                assert_eq!(mode, "polling");
            }
            other => panic!("expected fallback, got {:?}", other),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_loss_closes_stream() {
        let bus = Arc::new(MemoryProgressBus::new());
        let job_id = JobId::new();
        let mut stream = Box::pin(subscribe_stream(bus.clone(), job_id, config()));
        expect_connected(&mut stream).await;

        bus.disconnect_all();
        assert!(stream.next().await.is_none());
    }
}
