//! Worker runtime: runs the scheduler and sweeps, and shuts them down.
//!
//! Shutdown is triggered by SIGINT, SIGTERM or SIGQUIT, or by any background
//! task exiting, failing or panicking. Tickers are cancelled first, the
//! in-flight tick is awaited, then every `processing` job is put back to
//! `pending`.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use tunefetch_queue::JobQueue;

use crate::error::WorkerResult;
use crate::scheduler::Scheduler;
use crate::sweeps::{RecoverySweep, RetentionSweep};

/// Why the worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    TaskExited(&'static str),
    TaskFailed { task: &'static str, error: String },
    Panic(String),
}

impl ShutdownReason {
    /// Anything but an operator signal.
    pub fn is_fault(&self) -> bool {
        !matches!(self, ShutdownReason::Signal(_))
    }
}

type TaskResult = (&'static str, WorkerResult<()>);

/// The assembled worker.
pub struct Worker {
    queue: JobQueue,
    scheduler: Scheduler,
    recovery: RecoverySweep,
    retention: RetentionSweep,
}

impl Worker {
    pub fn new(
        queue: JobQueue,
        scheduler: Scheduler,
        recovery: RecoverySweep,
        retention: RetentionSweep,
    ) -> Self {
        Self {
            queue,
            scheduler,
            recovery,
            retention,
        }
    }

    /// Run until a termination signal or a task fault.
    pub async fn run(self) -> WorkerResult<ShutdownReason> {
        self.run_until(wait_for_signal()).await
    }

    /// Run until `stop` resolves or a task fault.
    pub async fn run_until<S>(self, stop: S) -> WorkerResult<ShutdownReason>
    where
        S: Future<Output = WorkerResult<&'static str>>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        let scheduler = self.scheduler.clone();
        let rx = shutdown_rx.clone();
        tasks.spawn(async move { ("scheduler", scheduler.run(rx).await) });

        let recovery = self.recovery.clone();
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            recovery.run(rx).await;
            ("recovery sweep", Ok(()))
        });

        let retention = self.retention.clone();
        let rx = shutdown_rx;
        tasks.spawn(async move {
            retention.run(rx).await;
            ("retention sweep", Ok(()))
        });

        let reason = tokio::select! {
            signal = stop => match signal {
                Ok(name) => ShutdownReason::Signal(name),
                Err(e) => ShutdownReason::TaskFailed {
                    task: "signal handler",
                    error: e.to_string(),
                },
            },
            Some(joined) = tasks.join_next() => match joined {
                Ok((task, Ok(()))) => ShutdownReason::TaskExited(task),
                Ok((task, Err(e))) => ShutdownReason::TaskFailed { task, error: e.to_string() },
                Err(e) => ShutdownReason::Panic(e.to_string()),
            },
        };

        if reason.is_fault() {
            error!("Worker shutting down after fault: {:?}", reason);
        } else {
            info!("Worker shutting down ({:?})", reason);
        }

        // Cancel tickers; an in-flight tick runs to completion.
        let _ = shutdown_tx.send(true);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((task, Err(e))) => warn!(task, "Task ended with error: {}", e),
                Err(e) => warn!("Task panicked during shutdown: {}", e),
                Ok(_) => {}
            }
        }

        match self.queue.reset_in_flight().await {
            Ok(0) => {}
            Ok(count) => info!("Reset {} processing jobs to pending", count),
            Err(e) => error!("Failed to reset processing jobs: {}", e),
        }

        info!("Worker shutdown complete");
        Ok(reason)
    }
}

/// Resolve on the first of SIGINT, SIGTERM, SIGQUIT.
#[cfg(unix)]
pub async fn wait_for_signal() -> WorkerResult<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> WorkerResult<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("CTRL_C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchError, TrackFetcher};
    use crate::processor::tests::{album, FakeMetadata};
    use crate::processor::JobProcessor;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tunefetch_models::JobStatus;
    use tunefetch_queue::{MemoryBackend, MemoryProgressBus, ProgressPublisher, QueueConfig};

    struct PanickingFetcher;

    #[async_trait]
    impl TrackFetcher for PanickingFetcher {
        async fn fetch(&self, _query: &str, _folder: &Path) -> Result<(), FetchError> {
            panic!("fetcher exploded");
        }
    }

    fn worker(fetcher: Arc<dyn TrackFetcher>, root: &Path) -> (Worker, JobQueue) {
        let queue = JobQueue::new(Arc::new(MemoryBackend::new()), QueueConfig::default());
        let processor = JobProcessor::new(
            Arc::new(FakeMetadata {
                entry: Some(album(&[("One", "A")])),
            }),
            fetcher,
            ProgressPublisher::new(Arc::new(MemoryProgressBus::new())),
            root,
        );
        let threshold = chrono::Duration::minutes(5);
        let scheduler =
            Scheduler::new(queue.clone(), processor, threshold, Duration::from_millis(10));
        let recovery = RecoverySweep::new(queue.clone(), threshold, Duration::from_secs(600));
        let retention = RetentionSweep::new(
            queue.clone(),
            chrono::Duration::hours(24),
            Duration::from_secs(3600),
        );
        (Worker::new(queue.clone(), scheduler, recovery, retention), queue)
    }

    #[tokio::test]
    async fn test_panic_triggers_graceful_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, queue) = worker(Arc::new(PanickingFetcher), dir.path());
        queue.enqueue("https://open.spotify.com/album/abc").await.unwrap();

        let reason = worker.run_until(std::future::pending()).await.unwrap();
        assert!(matches!(reason, ShutdownReason::Panic(_)));

        let head = queue.store().head().await.unwrap().unwrap().job;
        assert_eq!(head.status, JobStatus::Pending);
        assert_eq!(head.attempt, 0);
        assert!(queue.store().markers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_signal_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, _queue) = worker(Arc::new(PanickingFetcher), dir.path());

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("SIGTERM")
        };
        let reason = worker.run_until(stop).await.unwrap();
        assert_eq!(reason, ShutdownReason::Signal("SIGTERM"));
    }
}
