//! Typed job collections on top of a [`StoreBackend`].
//!
//! Layout (prefix defaults to `tunefetch`):
//! - `{prefix}:jobs:pending`            list, head is next to run
//! - `{prefix}:jobs:processing:{id}`    marker key per claimed job
//! - `{prefix}:jobs:completed`          list, terminal `done` records
//! - `{prefix}:jobs:failed`             list, terminal `failed` records

use std::sync::Arc;

use tracing::warn;

use tunefetch_models::{Job, JobId};

use crate::backend::StoreBackend;
use crate::error::{QueueError, QueueResult};

/// Read-then-swap retries before an id-based update gives up.
const CAS_ATTEMPTS: usize = 3;

/// The ordered job collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Pending,
    Completed,
    Failed,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Pending => "pending",
            Collection::Completed => "completed",
            Collection::Failed => "failed",
        }
    }
}

/// A job together with the exact serialized value held by the store.
///
/// The raw value is what conditional updates and removals match against.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub job: Job,
    pub raw: String,
}

impl StoredJob {
    pub fn encode(job: Job) -> QueueResult<Self> {
        let raw = serde_json::to_string(&job)?;
        Ok(Self { job, raw })
    }

    pub fn decode(collection: &str, raw: String) -> QueueResult<Self> {
        match serde_json::from_str::<Job>(&raw) {
            Ok(job) => Ok(Self { job, raw }),
            Err(e) => Err(QueueError::corrupt(collection, raw, e)),
        }
    }
}

/// Result of reading a whole collection.
#[derive(Debug, Default)]
pub struct Scan {
    /// Parsed entries with their list position.
    pub entries: Vec<(usize, StoredJob)>,
    /// Raw values that failed to parse.
    pub corrupt: Vec<String>,
}

impl Scan {
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.entries.iter().map(|(_, stored)| &stored.job)
    }
}

/// Key names for a given prefix.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn collection(&self, collection: Collection) -> String {
        format!("{}:jobs:{}", self.prefix, collection.as_str())
    }

    pub fn marker_prefix(&self) -> String {
        format!("{}:jobs:processing:", self.prefix)
    }

    pub fn marker(&self, job_id: &JobId) -> String {
        format!("{}{}", self.marker_prefix(), job_id)
    }

    pub fn progress_topic(&self, job_id: &JobId) -> String {
        format!("{}:progress:{}", self.prefix, job_id)
    }
}

/// Durable job collections.
#[derive(Clone)]
pub struct JobStore {
    backend: Arc<dyn StoreBackend>,
    keys: StoreKeys,
}

impl JobStore {
    pub fn new(backend: Arc<dyn StoreBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            keys: StoreKeys::new(prefix),
        }
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    /// First entry of the pending queue, left in place.
    pub async fn head(&self) -> QueueResult<Option<StoredJob>> {
        let key = self.keys.collection(Collection::Pending);
        match self.backend.index(&key, 0).await? {
            Some(raw) => StoredJob::decode(Collection::Pending.as_str(), raw).map(Some),
            None => Ok(None),
        }
    }

    /// Read every entry of a collection, separating unparseable ones.
    pub async fn scan(&self, collection: Collection) -> QueueResult<Scan> {
        let key = self.keys.collection(collection);
        let mut scan = Scan::default();

        for (position, raw) in self.backend.range(&key).await?.into_iter().enumerate() {
            match StoredJob::decode(collection.as_str(), raw) {
                Ok(stored) => scan.entries.push((position, stored)),
                Err(QueueError::CorruptRecord { raw, reason, .. }) => {
                    warn!(collection = collection.as_str(), "Unparseable job record: {}", reason);
                    scan.corrupt.push(raw);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(scan)
    }

    pub async fn len(&self, collection: Collection) -> QueueResult<usize> {
        self.backend.len(&self.keys.collection(collection)).await
    }

    /// Append a job to the tail of a collection.
    pub async fn append(&self, collection: Collection, job: Job) -> QueueResult<StoredJob> {
        let stored = StoredJob::encode(job)?;
        self.backend
            .push_tail(&self.keys.collection(collection), &stored.raw)
            .await?;
        Ok(stored)
    }

    /// Remove one entry by its raw value. Returns whether it was present.
    pub async fn remove_raw(&self, collection: Collection, raw: &str) -> QueueResult<bool> {
        let removed = self
            .backend
            .remove(&self.keys.collection(collection), raw)
            .await?;
        Ok(removed > 0)
    }

    /// Replace `current` with `job`, in place.
    ///
    /// Tries `hint` first, then the entry's actual position. Returns `None`
    /// when `current` is no longer in the collection or changed under us.
    pub async fn replace(
        &self,
        collection: Collection,
        hint: usize,
        current: &StoredJob,
        job: Job,
    ) -> QueueResult<Option<StoredJob>> {
        let key = self.keys.collection(collection);
        let next = StoredJob::encode(job)?;

        if self
            .backend
            .compare_and_set_index(&key, hint as isize, &current.raw, &next.raw)
            .await?
        {
            return Ok(Some(next));
        }

        let entries = self.backend.range(&key).await?;
        let Some(position) = entries.iter().position(|raw| *raw == current.raw) else {
            return Ok(None);
        };

        let swapped = self
            .backend
            .compare_and_set_index(&key, position as isize, &current.raw, &next.raw)
            .await?;
        Ok(swapped.then_some(next))
    }

    /// Current entry of a job, wherever it sits in the collection.
    pub async fn find(
        &self,
        collection: Collection,
        job_id: &JobId,
    ) -> QueueResult<Option<(usize, StoredJob)>> {
        let scan = self.scan(collection).await?;
        Ok(scan
            .entries
            .into_iter()
            .find(|(_, stored)| &stored.job.id == job_id))
    }

    /// Remove a job by id, whatever its stored value is now. Returns whether
    /// an entry was removed.
    pub async fn remove_job(&self, collection: Collection, job_id: &JobId) -> QueueResult<bool> {
        for _ in 0..CAS_ATTEMPTS {
            let Some((_, current)) = self.find(collection, job_id).await? else {
                return Ok(false);
            };
            if self.remove_raw(collection, &current.raw).await? {
                return Ok(true);
            }
        }
        Err(QueueError::store_unavailable(format!(
            "entry for job {} kept changing during removal",
            job_id
        )))
    }

    /// Overwrite a job's entry by id, in place. Returns `None` when no entry
    /// with that id is in the collection.
    pub async fn replace_job(
        &self,
        collection: Collection,
        job: Job,
    ) -> QueueResult<Option<StoredJob>> {
        for _ in 0..CAS_ATTEMPTS {
            let Some((position, current)) = self.find(collection, &job.id).await? else {
                return Ok(None);
            };
            if let Some(next) = self.replace(collection, position, &current, job.clone()).await? {
                return Ok(Some(next));
            }
        }
        Err(QueueError::store_unavailable(format!(
            "entry for job {} kept changing during update",
            job.id
        )))
    }

    /// Replace the whole collection with `jobs`.
    ///
    /// Read-all/filter/rewrite: appends racing with the rewrite can be lost.
    pub async fn rewrite(&self, collection: Collection, jobs: &[Job]) -> QueueResult<()> {
        let key = self.keys.collection(collection);
        self.backend.delete(&key).await?;
        for job in jobs {
            let raw = serde_json::to_string(job)?;
            self.backend.push_tail(&key, &raw).await?;
        }
        Ok(())
    }

    pub async fn set_marker(&self, stored: &StoredJob) -> QueueResult<()> {
        self.backend
            .set(&self.keys.marker(&stored.job.id), &stored.raw)
            .await
    }

    pub async fn clear_marker(&self, job_id: &JobId) -> QueueResult<()> {
        self.backend.delete(&self.keys.marker(job_id)).await
    }

    /// Every processing marker. Unparseable markers are deleted.
    pub async fn markers(&self) -> QueueResult<Vec<StoredJob>> {
        let mut markers = Vec::new();

        for key in self.backend.keys(&self.keys.marker_prefix()).await? {
            let Some(raw) = self.backend.get(&key).await? else {
                continue;
            };
            match StoredJob::decode("processing-markers", raw) {
                Ok(stored) => markers.push(stored),
                Err(e) => {
                    warn!(key = %key, "Dropping corrupt processing marker: {}", e);
                    self.backend.delete(&key).await?;
                }
            }
        }

        Ok(markers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use tunefetch_models::JobStatus;

    fn store() -> JobStore {
        JobStore::new(Arc::new(MemoryBackend::new()), "test")
    }

    #[test]
    fn test_key_layout() {
        let keys = StoreKeys::new("tf");
        let id = JobId::from_string("abc");
        assert_eq!(keys.collection(Collection::Pending), "tf:jobs:pending");
        assert_eq!(keys.collection(Collection::Failed), "tf:jobs:failed");
        assert_eq!(keys.marker(&id), "tf:jobs:processing:abc");
        assert_eq!(keys.progress_topic(&id), "tf:progress:abc");
    }

    #[tokio::test]
    async fn test_scan_separates_corrupt_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let store = JobStore::new(backend.clone(), "test");

        store.append(Collection::Completed, Job::new("a")).await.unwrap();
        backend.push_tail("test:jobs:completed", "{not json").await.unwrap();
        store.append(Collection::Completed, Job::new("b")).await.unwrap();

        let scan = store.scan(Collection::Completed).await.unwrap();
        assert_eq!(scan.entries.len(), 2);
        assert_eq!(scan.entries[1].0, 2);
        assert_eq!(scan.corrupt, vec!["{not json".to_string()]);
    }

    #[tokio::test]
    async fn test_replace_detects_concurrent_change() {
        let store = store();
        let stored = store.append(Collection::Pending, Job::new("a")).await.unwrap();

        let mut claimed = stored.job.clone();
        claimed.mark_processing();
        let updated = store
            .replace(Collection::Pending, 0, &stored, claimed.clone())
            .await
            .unwrap()
            .expect("first replace wins");
        assert_eq!(updated.job.status, JobStatus::Processing);

        // The old raw value is gone, a second writer loses.
        assert!(store
            .replace(Collection::Pending, 0, &stored, claimed)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_replace_follows_moved_entry() {
        let store = store();
        let first = store.append(Collection::Pending, Job::new("a")).await.unwrap();
        let second = store.append(Collection::Pending, Job::new("b")).await.unwrap();
        store.remove_raw(Collection::Pending, &first.raw).await.unwrap();

        let mut job = second.job.clone();
        job.attempt = 2;
        let replaced = store.replace(Collection::Pending, 1, &second, job).await.unwrap();
        assert_eq!(replaced.unwrap().job.attempt, 2);
    }

    #[tokio::test]
    async fn test_updates_by_id_follow_rewritten_entry() {
        let store = store();
        store.append(Collection::Pending, Job::new("a")).await.unwrap();
        let stored = store.append(Collection::Pending, Job::new("b")).await.unwrap();

        // Someone else rewrote the entry after we read it.
        let mut newer = stored.job.clone();
        newer.attempt = 1;
        store.replace(Collection::Pending, 1, &stored, newer).await.unwrap();

        let mut retried = stored.job.clone();
        retried.attempt = 2;
        let replaced = store.replace_job(Collection::Pending, retried).await.unwrap();
        assert_eq!(replaced.unwrap().job.attempt, 2);
        assert_eq!(store.len(Collection::Pending).await.unwrap(), 2);

        assert!(store.remove_job(Collection::Pending, &stored.job.id).await.unwrap());
        assert!(!store.remove_job(Collection::Pending, &stored.job.id).await.unwrap());
        assert!(store.find(Collection::Pending, &stored.job.id).await.unwrap().is_none());
        assert!(store
            .replace_job(Collection::Pending, stored.job)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_markers_round_trip() {
        let store = store();
        let stored = StoredJob::encode(Job::new("a")).unwrap();
        store.set_marker(&stored).await.unwrap();

        let markers = store.markers().await.unwrap();
        assert_eq!(markers, vec![stored.clone()]);

        store.clear_marker(&stored.job.id).await.unwrap();
        assert!(store.markers().await.unwrap().is_empty());
    }
}
