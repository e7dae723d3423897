//! Scheduler: claims the queue head on every tick and runs it to completion.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tunefetch_models::{Job, ProgressEvent};
use tunefetch_queue::{ClaimOutcome, ClaimedJob, FailureOutcome, JobQueue};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::processor::JobProcessor;
use crate::retry::FailureTracker;

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    Idle,
    Busy,
    Reclaimed(Job),
    Dropped,
    Lost,
    Completed(Job),
    Retrying(Job),
    Failed(Job),
}

/// Single-consumer scheduler.
#[derive(Clone)]
pub struct Scheduler {
    queue: JobQueue,
    processor: JobProcessor,
    stale_threshold: chrono::Duration,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        queue: JobQueue,
        processor: JobProcessor,
        stale_threshold: chrono::Duration,
        tick_interval: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            stale_threshold,
            tick_interval,
        }
    }

    /// Tick until shutdown is signalled. An in-flight tick always finishes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        info!("Scheduler started, ticking every {:?}", self.tick_interval);

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new("scheduler tick", 3);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping scheduler");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let result = self.tick().await;
                    failures.observe(&result);
                }
            }
        }

        Ok(())
    }

    /// Run one scheduling step.
    pub async fn tick(&self) -> WorkerResult<TickOutcome> {
        let claimed = match self.queue.claim_head(self.stale_threshold, Utc::now()).await? {
            ClaimOutcome::Empty => return Ok(TickOutcome::Idle),
            ClaimOutcome::Busy(job) => {
                debug!(job_id = %job.id, "Queue head still processing");
                return Ok(TickOutcome::Busy);
            }
            ClaimOutcome::Reclaimed(job) => {
                metrics::record_reclaimed(1);
                return Ok(TickOutcome::Reclaimed(job));
            }
            ClaimOutcome::Dropped(reason) => {
                debug!("Dropped queue head: {}", reason);
                return Ok(TickOutcome::Dropped);
            }
            ClaimOutcome::Lost => return Ok(TickOutcome::Lost),
            ClaimOutcome::Claimed(claimed) => claimed,
        };

        metrics::record_claimed();
        let job_id = claimed.job().id.clone();
        let publisher = self.processor.publisher().clone();

        match self.processor.process(claimed.job()).await {
            Ok(payload) => {
                let job = self.queue.complete(claimed, &payload).await?;
                metrics::record_completed();
                publisher.emit(ProgressEvent::completed(&job_id, &payload)).await;
                Ok(TickOutcome::Completed(job))
            }
            Err(e) if e.is_permanent_failure() => {
                warn!(job_id = %job_id, "Rejecting job: {}", e);
                let job = self.queue.fail(claimed, &e.to_string()).await?;
                metrics::record_failed("invalid");
                publisher.emit(ProgressEvent::invalid_url(&job_id, &e.to_string())).await;
                Ok(TickOutcome::Failed(job))
            }
            Err(e) => self.handle_failure(claimed, e).await,
        }
    }

    async fn handle_failure(
        &self,
        claimed: ClaimedJob,
        e: WorkerError,
    ) -> WorkerResult<TickOutcome> {
        let job_id = claimed.job().id.clone();
        let message = e.to_string();

        match self.queue.fail_or_retry(claimed, &message).await? {
            FailureOutcome::Retrying(job) => {
                warn!(
                    job_id = %job_id,
                    attempt = job.attempt,
                    max_retries = self.queue.max_retries(),
                    "Job attempt failed, will retry: {}",
                    message
                );
                metrics::record_retried();
                Ok(TickOutcome::Retrying(job))
            }
            FailureOutcome::Failed(job) => {
                JobLogger::new(&job).log_error(&format!("failed permanently: {}", message));
                metrics::record_failed("exhausted");
                self.processor
                    .publisher()
                    .emit(ProgressEvent::failed(&job_id, &message))
                    .await;
                Ok(TickOutcome::Failed(job))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::TrackFetcher;
    use crate::processor::tests::{album, FakeFetcher, FakeMetadata};
    use futures_util::StreamExt;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tunefetch_models::{CatalogEntry, JobStatus, MediaKind, ProgressEventType, TrackRef};
    use tunefetch_queue::{
        Collection, EnqueueDisposition, MemoryBackend, MemoryProgressBus, ProgressBus,
        ProgressPublisher, QueueConfig,
    };

    struct Harness {
        scheduler: Scheduler,
        queue: JobQueue,
        backend: Arc<MemoryBackend>,
        bus: Arc<MemoryProgressBus>,
        _dir: tempfile::TempDir,
    }

    fn harness(fetcher: Arc<dyn TrackFetcher>) -> Harness {
        harness_with(album(&[("One", "A"), ("Two", "B")]), fetcher)
    }

    fn harness_with(entry: CatalogEntry, fetcher: Arc<dyn TrackFetcher>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let bus = Arc::new(MemoryProgressBus::new());
        let queue = JobQueue::new(backend.clone(), QueueConfig::default());
        let processor = JobProcessor::new(
            Arc::new(FakeMetadata { entry: Some(entry) }),
            fetcher,
            ProgressPublisher::new(bus.clone()),
            dir.path(),
        );
        let scheduler = Scheduler::new(
            queue.clone(),
            processor,
            chrono::Duration::minutes(5),
            Duration::from_secs(1),
        );
        Harness {
            scheduler,
            queue,
            backend,
            bus,
            _dir: dir,
        }
    }

    fn failing_fetcher() -> Arc<FakeFetcher> {
        Arc::new(FakeFetcher {
            failing: HashSet::from(["One A".to_string(), "Two B".to_string()]),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let h = harness(Arc::new(FakeFetcher::default()));
        assert!(matches!(h.scheduler.tick().await.unwrap(), TickOutcome::Idle));
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let h = harness(Arc::new(FakeFetcher::default()));
        let job = h.queue.enqueue("https://open.spotify.com/album/abc").await.unwrap().job;
        let mut events = h.bus.subscribe(&job.id).await.unwrap();

        match h.scheduler.tick().await.unwrap() {
            TickOutcome::Completed(done) => {
                assert_eq!(done.id, job.id);
                assert_eq!(done.payload.as_deref(), Some("Greatest Hits"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(h.queue.pending_len().await.unwrap(), 0);
        assert_eq!(h.queue.jobs(Collection::Completed).await.unwrap().len(), 1);

        let mut last = None;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), events.next()).await
        {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.event_type, ProgressEventType::Completed);
        assert_eq!(last.status, JobStatus::Done);
        assert_eq!(last.progress, 100);
    }

    #[tokio::test]
    async fn test_finished_track_is_served_from_cache() {
        let fetcher = Arc::new(FakeFetcher::default());
        let track = CatalogEntry {
            kind: MediaKind::Track,
            name: "One - A".to_string(),
            tracks: vec![TrackRef::new("One", "A")],
        };
        let h = harness_with(track, fetcher.clone());
        let url = "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC";

        let queued = h.queue.enqueue(url).await.unwrap();
        assert_eq!(queued.disposition, EnqueueDisposition::Enqueued);

        let done = match h.scheduler.tick().await.unwrap() {
            TickOutcome::Completed(done) => done,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(done.id, queued.job.id);
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.payload.as_deref(), Some("One - A"));
        assert_eq!(h.queue.pending_len().await.unwrap(), 0);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);

        let again = h.queue.enqueue(url).await.unwrap();
        assert_eq!(again.disposition, EnqueueDisposition::Cached);
        assert_eq!(again.job.id, done.id);

        assert!(matches!(h.scheduler.tick().await.unwrap(), TickOutcome::Idle));
        assert_eq!(h.queue.pending_len().await.unwrap(), 0);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_retry() {
        let h = harness(Arc::new(FakeFetcher::default()));
        let job = h.queue.enqueue("https://example.com/watch?v=1").await.unwrap().job;
        let mut events = h.bus.subscribe(&job.id).await.unwrap();

        match h.scheduler.tick().await.unwrap() {
            TickOutcome::Failed(failed) => {
                assert_eq!(failed.attempt, 0);
                assert_eq!(failed.status, JobStatus::Failed);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(events.next().await.unwrap().event_type, ProgressEventType::Started);
        let rejected = events.next().await.unwrap();
        assert_eq!(rejected.event_type, ProgressEventType::Error);
        assert_eq!(rejected.message, "Invalid URL");
    }

    #[tokio::test]
    async fn test_retries_then_fails() {
        let h = harness(failing_fetcher());
        h.queue.enqueue("https://open.spotify.com/album/abc").await.unwrap();

        for attempt in 1..=3 {
            match h.scheduler.tick().await.unwrap() {
                TickOutcome::Retrying(job) => assert_eq!(job.attempt, attempt),
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        match h.scheduler.tick().await.unwrap() {
            TickOutcome::Failed(job) => {
                assert_eq!(job.attempt, 3);
                assert!(job.error.unwrap().contains("all 2 tracks failed"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.queue.jobs(Collection::Failed).await.unwrap().len(), 1);
        assert!(matches!(h.scheduler.tick().await.unwrap(), TickOutcome::Idle));
    }

    #[tokio::test]
    async fn test_store_outage_skips_tick() {
        let h = harness(Arc::new(FakeFetcher::default()));
        h.backend.set_available(false);

        let err = h.scheduler.tick().await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness(Arc::new(FakeFetcher::default()));
        h.queue.enqueue("https://open.spotify.com/album/abc").await.unwrap();

        let (tx, rx) = watch::channel(false);
        let scheduler = h.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(h.queue.jobs(Collection::Completed).await.unwrap().len(), 1);
    }
}
