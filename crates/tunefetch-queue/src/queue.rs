//! Job queue: admission, claim/release and retry bookkeeping.
//!
//! The pending list is authoritative. A claimed job stays at the head with
//! status `processing` until it is finalized; a marker key mirrors the claim so
//! that a job lost between "remove from pending" and "append to archive" can
//! still be found after a crash.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use tunefetch_models::{Job, JobId, JobStatus};

use crate::backend::{RedisBackend, StoreBackend};
use crate::error::{QueueError, QueueResult};
use crate::store::{Collection, JobStore, Scan, StoredJob};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the queue writes
    pub key_prefix: String,
    /// Retries after the first attempt before a job is failed
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "tunefetch".to_string(),
            max_retries: 3,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|_| "tunefetch".to_string()),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        }
    }
}

/// How an enqueue request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueDisposition {
    /// A new job was appended to the pending queue.
    Enqueued,
    /// A pending or processing job for the URL already exists.
    InFlight,
    /// A completed job for the URL exists; its payload is reused.
    Cached,
}

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueOutcome {
    pub job: Job,
    pub disposition: EnqueueDisposition,
}

/// A job claimed by the current tick.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    stored: StoredJob,
}

impl ClaimedJob {
    pub fn job(&self) -> &Job {
        &self.stored.job
    }
}

/// What a claim attempt on the queue head found.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// Nothing queued.
    Empty,
    /// Head is being processed and is not stale yet.
    Busy(Job),
    /// Head was stuck in `processing` and has been reset to `pending`.
    Reclaimed(Job),
    /// Head was removed: a leftover terminal record or an unparseable entry.
    Dropped(String),
    /// Head changed between read and claim.
    Lost,
    /// Head is now owned by the caller.
    Claimed(ClaimedJob),
}

/// Outcome of reporting a failed processing pass.
#[derive(Debug, Clone)]
pub enum FailureOutcome {
    /// Back to `pending` at the head with one more attempt.
    Retrying(Job),
    /// Attempt budget exhausted, moved to the failed archive.
    Failed(Job),
}

/// Counts from a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub completed_removed: usize,
    pub failed_removed: usize,
}

/// Job queue client.
///
/// Clones share the set of jobs claimed through this process, so stale
/// recovery running beside the scheduler never resets a job that is still
/// being worked on.
#[derive(Clone)]
pub struct JobQueue {
    store: JobStore,
    config: QueueConfig,
    held: Arc<Mutex<HashSet<JobId>>>,
}

impl JobQueue {
    /// Create a queue over any store backend.
    pub fn new(backend: Arc<dyn StoreBackend>, config: QueueConfig) -> Self {
        let store = JobStore::new(backend, config.key_prefix.clone());
        Self {
            store,
            config,
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create a Redis-backed queue.
    pub fn connect(config: QueueConfig) -> QueueResult<Self> {
        let backend = RedisBackend::new(&config.redis_url)?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::connect(QueueConfig::from_env())
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Get max retries from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn held(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True while a claim on `job_id` taken through this queue is unfinished.
    pub fn is_held(&self, job_id: &JobId) -> bool {
        self.held().contains(job_id)
    }

    /// Admit a URL.
    ///
    /// In-flight job for the URL → returned as is. Completed job → returned
    /// with its payload. Otherwise a new pending job is appended. The scan and
    /// the append are separate operations, so two concurrent calls for the
    /// same URL may both create a job.
    pub async fn enqueue(&self, url: &str) -> QueueResult<EnqueueOutcome> {
        let pending = self.store.scan(Collection::Pending).await?;
        if let Some(job) = pending
            .jobs()
            .find(|job| job.url == url && job.status.is_in_flight())
        {
            debug!(job_id = %job.id, "Job already queued for {}", url);
            return Ok(EnqueueOutcome {
                job: job.clone(),
                disposition: EnqueueDisposition::InFlight,
            });
        }

        let completed = self.store.scan(Collection::Completed).await?;
        if let Some(job) = completed
            .jobs()
            .find(|job| job.url == url && job.status == JobStatus::Done)
        {
            debug!(job_id = %job.id, "Reusing completed job for {}", url);
            return Ok(EnqueueOutcome {
                job: job.clone(),
                disposition: EnqueueDisposition::Cached,
            });
        }

        let stored = self.store.append(Collection::Pending, Job::new(url)).await?;
        info!(job_id = %stored.job.id, "Enqueued job for {}", url);

        Ok(EnqueueOutcome {
            job: stored.job,
            disposition: EnqueueDisposition::Enqueued,
        })
    }

    /// Find the job for a URL: completed archive, then processing entries,
    /// then pending entries.
    pub async fn lookup_by_url(&self, url: &str) -> QueueResult<Option<Job>> {
        let completed = self.store.scan(Collection::Completed).await?;
        if let Some(job) = completed.jobs().find(|job| job.url == url) {
            return Ok(Some(job.clone()));
        }

        let pending = self.store.scan(Collection::Pending).await?;
        let processing = pending
            .jobs()
            .find(|job| job.url == url && job.status == JobStatus::Processing);
        let queued = || {
            pending
                .jobs()
                .find(|job| job.url == url && job.status == JobStatus::Pending)
        };

        Ok(processing.or_else(queued).cloned())
    }

    /// Try to take ownership of the queue head.
    ///
    /// Only the head is ever eligible. A stale `processing` head is reset and
    /// left for the next tick.
    pub async fn claim_head(
        &self,
        stale_threshold: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<ClaimOutcome> {
        let head = match self.store.head().await {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(ClaimOutcome::Empty),
            Err(QueueError::CorruptRecord { raw, reason, .. }) => {
                warn!("Dropping unparseable queue head: {}", reason);
                self.store.remove_raw(Collection::Pending, &raw).await?;
                return Ok(ClaimOutcome::Dropped(reason));
            }
            Err(e) => return Err(e),
        };

        match head.job.status {
            JobStatus::Processing
                if head.job.is_stale(stale_threshold, now) && !self.is_held(&head.job.id) =>
            {
                let mut job = head.job.clone();
                job.mark_retry(None);
                match self.store.replace(Collection::Pending, 0, &head, job).await? {
                    Some(reset) => {
                        self.store.clear_marker(&reset.job.id).await?;
                        warn!(
                            job_id = %reset.job.id,
                            attempt = reset.job.attempt,
                            "Reclaimed stale job at queue head"
                        );
                        Ok(ClaimOutcome::Reclaimed(reset.job))
                    }
                    None => Ok(ClaimOutcome::Lost),
                }
            }
            JobStatus::Processing => Ok(ClaimOutcome::Busy(head.job)),
            JobStatus::Pending => {
                let mut job = head.job.clone();
                job.mark_processing();
                match self.store.replace(Collection::Pending, 0, &head, job).await? {
                    Some(claimed) => {
                        self.held().insert(claimed.job.id.clone());
                        if let Err(e) = self.store.set_marker(&claimed).await {
                            self.held().remove(&claimed.job.id);
                            return Err(e);
                        }
                        Ok(ClaimOutcome::Claimed(ClaimedJob { stored: claimed }))
                    }
                    None => Ok(ClaimOutcome::Lost),
                }
            }
            status => {
                warn!(job_id = %head.job.id, "Dropping {} job from pending queue", status);
                self.store.remove_raw(Collection::Pending, &head.raw).await?;
                Ok(ClaimOutcome::Dropped(format!("leftover {} entry", status)))
            }
        }
    }

    /// Finish a claimed job successfully.
    pub async fn complete(&self, claimed: ClaimedJob, payload: &str) -> QueueResult<Job> {
        let job_id = claimed.job().id.clone();
        let result = self.finish_complete(claimed, payload).await;
        self.held().remove(&job_id);
        result
    }

    async fn finish_complete(&self, claimed: ClaimedJob, payload: &str) -> QueueResult<Job> {
        let mut job = claimed.stored.job;
        job.mark_done(payload);

        self.take_from_pending(&job.id).await?;
        let stored = self.store.append(Collection::Completed, job).await?;
        self.store.clear_marker(&stored.job.id).await?;

        Ok(stored.job)
    }

    /// Report a failed processing pass: retry in place or fail permanently.
    pub async fn fail_or_retry(
        &self,
        claimed: ClaimedJob,
        error: &str,
    ) -> QueueResult<FailureOutcome> {
        let job_id = claimed.job().id.clone();
        let result = self.finish_retry(claimed, error).await;
        self.held().remove(&job_id);
        result
    }

    async fn finish_retry(&self, claimed: ClaimedJob, error: &str) -> QueueResult<FailureOutcome> {
        if claimed.stored.job.attempt >= self.config.max_retries {
            return self.finish_fail(claimed, error).await.map(FailureOutcome::Failed);
        }

        let mut job = claimed.stored.job;
        job.mark_retry(Some(error.to_string()));

        let retried = match self.store.replace_job(Collection::Pending, job.clone()).await? {
            Some(stored) => stored.job,
            None => {
                warn!(job_id = %job.id, "Claimed job missing from queue, re-appending");
                self.store.append(Collection::Pending, job).await?.job
            }
        };
        self.store.clear_marker(&retried.id).await?;

        Ok(FailureOutcome::Retrying(retried))
    }

    /// Fail a claimed job without retry.
    pub async fn fail(&self, claimed: ClaimedJob, error: &str) -> QueueResult<Job> {
        let job_id = claimed.job().id.clone();
        let result = self.finish_fail(claimed, error).await;
        self.held().remove(&job_id);
        result
    }

    async fn finish_fail(&self, claimed: ClaimedJob, error: &str) -> QueueResult<Job> {
        let mut job = claimed.stored.job;
        job.mark_failed(error);

        self.take_from_pending(&job.id).await?;
        let stored = self.store.append(Collection::Failed, job).await?;
        self.store.clear_marker(&stored.job.id).await?;

        Ok(stored.job)
    }

    /// Remove a finished job from the pending queue by id.
    async fn take_from_pending(&self, job_id: &JobId) -> QueueResult<()> {
        if !self.store.remove_job(Collection::Pending, job_id).await? {
            warn!(job_id = %job_id, "Finished job was no longer in the pending queue");
        }
        Ok(())
    }

    /// Reset every stale `processing` job to `pending` with one more attempt.
    ///
    /// Pending entries are reset in place. Markers of jobs found in no
    /// collection are re-appended to the queue. Unparseable pending entries
    /// are dropped. Returns the number of jobs reset.
    pub async fn reclaim_stale(
        &self,
        stale_threshold: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<usize> {
        let pending = self.store.scan(Collection::Pending).await?;
        for raw in &pending.corrupt {
            self.store.remove_raw(Collection::Pending, raw).await?;
        }

        let mut reclaimed = 0;
        for (position, stored) in &pending.entries {
            if !stored.job.is_stale(stale_threshold, now) {
                continue;
            }
            if self.is_held(&stored.job.id) {
                debug!(job_id = %stored.job.id, "Skipping stale check of job still in progress");
                continue;
            }
            let mut job = stored.job.clone();
            job.mark_retry(None);
            let replaced = self
                .store
                .replace(Collection::Pending, *position, stored, job)
                .await?;
            if let Some(reset) = replaced {
                self.store.clear_marker(&reset.job.id).await?;
                info!(job_id = %reset.job.id, attempt = reset.job.attempt, "Reclaimed stale job");
                reclaimed += 1;
            }
        }

        for marker in self.orphaned_markers(&pending, Some((stale_threshold, now))).await? {
            let mut job = marker.job.clone();
            job.mark_retry(None);
            let job_id = job.id.clone();
            self.store.append(Collection::Pending, job).await?;
            self.store.clear_marker(&job_id).await?;
            info!(job_id = %job_id, "Requeued job from orphaned processing marker");
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Undo every claim before shutdown: `processing` jobs go back to
    /// `pending` without consuming an attempt.
    pub async fn reset_in_flight(&self) -> QueueResult<usize> {
        self.held().clear();
        let pending = self.store.scan(Collection::Pending).await?;
        let mut reset = 0;

        for (position, stored) in &pending.entries {
            if stored.job.status != JobStatus::Processing {
                continue;
            }
            let mut job = stored.job.clone();
            job.transition(JobStatus::Pending);
            if self.store.replace(Collection::Pending, *position, stored, job).await?.is_some() {
                reset += 1;
            }
            self.store.clear_marker(&stored.job.id).await?;
        }

        for marker in self.orphaned_markers(&pending, None).await? {
            let mut job = marker.job.clone();
            job.transition(JobStatus::Pending);
            let job_id = job.id.clone();
            self.store.append(Collection::Pending, job).await?;
            self.store.clear_marker(&job_id).await?;
            reset += 1;
        }

        Ok(reset)
    }

    /// Markers whose job is in no collection. Markers of jobs that did reach
    /// an archive are deleted on the way.
    async fn orphaned_markers(
        &self,
        pending: &Scan,
        stale: Option<(Duration, DateTime<Utc>)>,
    ) -> QueueResult<Vec<StoredJob>> {
        let markers = self.store.markers().await?;
        if markers.is_empty() {
            return Ok(Vec::new());
        }

        let completed = self.store.scan(Collection::Completed).await?;
        let failed = self.store.scan(Collection::Failed).await?;
        let mut orphans = Vec::new();

        for marker in markers {
            let id = &marker.job.id;
            if pending.jobs().any(|job| &job.id == id) || self.is_held(id) {
                continue;
            }
            if completed.jobs().chain(failed.jobs()).any(|job| &job.id == id) {
                self.store.clear_marker(id).await?;
                continue;
            }
            if let Some((threshold, now)) = stale {
                if !marker.job.is_stale(threshold, now) {
                    continue;
                }
            }
            orphans.push(marker);
        }

        Ok(orphans)
    }

    /// Drop archived jobs older than `ttl`.
    ///
    /// Keeps entries whose age is strictly below the TTL. Each archive is
    /// rewritten only when something was removed.
    pub async fn sweep_retention(
        &self,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<RetentionReport> {
        Ok(RetentionReport {
            completed_removed: self.sweep_collection(Collection::Completed, ttl, now).await?,
            failed_removed: self.sweep_collection(Collection::Failed, ttl, now).await?,
        })
    }

    async fn sweep_collection(
        &self,
        collection: Collection,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<usize> {
        let scan = self.store.scan(collection).await?;
        let total = scan.entries.len() + scan.corrupt.len();

        let keep: Vec<Job> = scan
            .jobs()
            .filter(|job| job.age(now) < ttl)
            .cloned()
            .collect();

        let removed = total - keep.len();
        if removed > 0 {
            self.store.rewrite(collection, &keep).await?;
            info!(collection = collection.as_str(), "Removed {} expired jobs", removed);
        }

        Ok(removed)
    }

    /// Get pending queue length.
    pub async fn pending_len(&self) -> QueueResult<usize> {
        self.store.len(Collection::Pending).await
    }

    /// All parseable jobs of a collection.
    pub async fn jobs(&self, collection: Collection) -> QueueResult<Vec<Job>> {
        let scan = self.store.scan(collection).await?;
        Ok(scan.entries.into_iter().map(|(_, stored)| stored.job).collect())
    }
}
