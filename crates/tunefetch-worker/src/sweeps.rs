//! Background sweeps: stale-job recovery and archive retention.
//!
//! Both run once at startup and then on their own interval until shutdown.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::info;

use tunefetch_queue::{JobQueue, QueueResult, RetentionReport};

use crate::metrics;
use crate::retry::FailureTracker;

/// Resets jobs stuck in `processing`.
#[derive(Clone)]
pub struct RecoverySweep {
    queue: JobQueue,
    stale_threshold: chrono::Duration,
    period: Duration,
}

impl RecoverySweep {
    pub fn new(queue: JobQueue, stale_threshold: chrono::Duration, period: Duration) -> Self {
        Self {
            queue,
            stale_threshold,
            period,
        }
    }

    /// One recovery pass. Returns the number of jobs reset.
    pub async fn run_once(&self) -> QueueResult<usize> {
        let reclaimed = self.queue.reclaim_stale(self.stale_threshold, Utc::now()).await?;
        if reclaimed > 0 {
            info!("Recovered {} stale jobs", reclaimed);
            metrics::record_reclaimed(reclaimed);
        }
        metrics::set_queue_length(self.queue.pending_len().await?);
        Ok(reclaimed)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting stale job recovery (interval: {:?})", self.period);
        let mut failures = FailureTracker::new("recovery sweep", 3);
        let mut ticker = ticker(self.period);

        while next_pass(&mut ticker, &mut shutdown).await {
            let result = self.run_once().await;
            failures.observe(&result);
        }
    }
}

/// Evicts archived jobs past their TTL.
#[derive(Clone)]
pub struct RetentionSweep {
    queue: JobQueue,
    ttl: chrono::Duration,
    period: Duration,
}

impl RetentionSweep {
    pub fn new(queue: JobQueue, ttl: chrono::Duration, period: Duration) -> Self {
        Self { queue, ttl, period }
    }

    pub async fn run_once(&self) -> QueueResult<RetentionReport> {
        let report = self.queue.sweep_retention(self.ttl, Utc::now()).await?;
        if report.completed_removed > 0 {
            info!("Cleaned up {} old completed jobs", report.completed_removed);
            metrics::record_expired("completed", report.completed_removed);
        }
        if report.failed_removed > 0 {
            info!("Cleaned up {} old failed jobs", report.failed_removed);
            metrics::record_expired("failed", report.failed_removed);
        }
        Ok(report)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting retention sweep (interval: {:?}, ttl: {})", self.period, self.ttl);
        let mut failures = FailureTracker::new("retention sweep", 3);
        let mut ticker = ticker(self.period);

        while next_pass(&mut ticker, &mut shutdown).await {
            let result = self.run_once().await;
            failures.observe(&result);
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Wait for the next pass. The first tick fires immediately. Returns `false`
/// once shutdown is signalled.
async fn next_pass(ticker: &mut Interval, shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
            _ = ticker.tick() => return true,
        }
    }
}
