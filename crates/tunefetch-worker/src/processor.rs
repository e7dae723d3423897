//! Executes one claimed job: resolve metadata, fetch every track.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Instrument;

use tunefetch_models::{CatalogEntry, CatalogUrl, Job, JobId, MediaKind, ProgressEvent, TrackRef};
use tunefetch_queue::ProgressPublisher;

use crate::error::{WorkerError, WorkerResult};
use crate::fetcher::{FetchError, TrackFetcher};
use crate::logging::JobLogger;
use crate::provider::MetadataProvider;

/// Result of handling one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Downloaded,
    Skipped,
    Failed(String),
}

impl TrackOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TrackOutcome::Failed(_))
    }
}

/// Folder that receives the tracks of an entry.
pub fn output_folder(root: &Path, kind: MediaKind, folder_name: &str) -> PathBuf {
    root.join(kind.folder_name()).join(folder_name)
}

/// True when `folder` holds an `.mp3` whose name contains the track name,
/// case-insensitively.
pub async fn track_exists(folder: &Path, track_name: &str) -> std::io::Result<bool> {
    let needle = track_name.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(false);
    }

    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.ends_with(".mp3") && name.contains(&needle) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Fold per-track outcomes into the job result.
///
/// A job fails only when it had tracks and every one of them failed.
pub fn fold_outcomes(outcomes: &[TrackOutcome]) -> Result<(), String> {
    if outcomes.is_empty() || !outcomes.iter().all(TrackOutcome::is_failure) {
        return Ok(());
    }

    let last_error = outcomes
        .iter()
        .rev()
        .find_map(|o| match o {
            TrackOutcome::Failed(e) => Some(e.as_str()),
            _ => None,
        })
        .unwrap_or("unknown error");

    if outcomes.len() == 1 {
        Err(last_error.to_string())
    } else {
        Err(format!("all {} tracks failed, last error: {}", outcomes.len(), last_error))
    }
}

/// Runs the download flow of a job.
#[derive(Clone)]
pub struct JobProcessor {
    metadata: Arc<dyn MetadataProvider>,
    fetcher: Arc<dyn TrackFetcher>,
    publisher: ProgressPublisher,
    output_root: PathBuf,
}

impl JobProcessor {
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        fetcher: Arc<dyn TrackFetcher>,
        publisher: ProgressPublisher,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            metadata,
            fetcher,
            publisher,
            output_root: output_root.into(),
        }
    }

    pub fn publisher(&self) -> &ProgressPublisher {
        &self.publisher
    }

    /// Create the per-kind output folders.
    pub async fn prepare_output(&self) -> WorkerResult<()> {
        for kind in MediaKind::ALL {
            tokio::fs::create_dir_all(self.output_root.join(kind.folder_name())).await?;
        }
        Ok(())
    }

    /// Process a job. Returns the payload (name of the output folder).
    pub async fn process(&self, job: &Job) -> WorkerResult<String> {
        let logger = JobLogger::new(job);
        let span = logger.create_span();
        self.run(job, &logger).instrument(span).await
    }

    async fn run(&self, job: &Job, logger: &JobLogger) -> WorkerResult<String> {
        logger.log_start(&job.url);
        self.publisher.emit(ProgressEvent::started(&job.id)).await;

        let url = CatalogUrl::parse(&job.url).map_err(|e| WorkerError::validation(e.to_string()))?;
        let entry = self.metadata.resolve(&url).await?;

        let folder_name = entry.folder_name(&url);
        let folder = output_folder(&self.output_root, entry.kind, &folder_name);
        tokio::fs::create_dir_all(&folder).await?;

        let total = entry.tracks.len() as u32;
        if entry.kind != MediaKind::Track {
            let message = format!("Processing {}: {} ({} tracks)", entry.kind, entry.name, total);
            logger.log_progress(&message);
            self.publisher
                .emit(ProgressEvent::info(&job.id, &entry.name, message, total))
                .await;
        }

        let mut outcomes = Vec::with_capacity(entry.tracks.len());
        for (index, track) in entry.tracks.iter().enumerate() {
            let outcome = self
                .process_track(&job.id, track, index as u32, total, &folder)
                .await?;
            if let TrackOutcome::Failed(e) = &outcome {
                logger.log_warning(&format!("{} failed: {}", track.label(), e));
            }
            outcomes.push(outcome);
        }

        fold_outcomes(&outcomes).map_err(|e| WorkerError::Fetch(FetchError::Failed(e)))?;

        logger.log_completion(&folder_name);
        Ok(folder_name)
    }

    async fn process_track(
        &self,
        job_id: &JobId,
        track: &TrackRef,
        index: u32,
        total: u32,
        folder: &Path,
    ) -> WorkerResult<TrackOutcome> {
        let label = track.label();

        if track_exists(folder, &track.name).await? {
            self.publisher
                .emit(ProgressEvent::skipped(job_id, &label, index, total))
                .await;
            return Ok(TrackOutcome::Skipped);
        }

        self.publisher
            .emit(ProgressEvent::downloading(job_id, &label, index, total))
            .await;

        match self.fetcher.fetch(&track.query(), folder).await {
            Ok(()) => {
                self.publisher
                    .emit(ProgressEvent::downloaded(job_id, &label, index, total))
                    .await;
                Ok(TrackOutcome::Downloaded)
            }
            Err(e) => {
                let error = e.to_string();
                self.publisher
                    .emit(ProgressEvent::track_failed(job_id, &label, index, total, &error))
                    .await;
                Ok(TrackOutcome::Failed(error))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::provider::MetadataError;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tunefetch_models::ProgressEventType;
    use tunefetch_queue::{MemoryProgressBus, ProgressBus};

    /// Returns a fixed entry for every URL.
    pub struct FakeMetadata {
        pub entry: Option<CatalogEntry>,
    }

    #[async_trait]
    impl MetadataProvider for FakeMetadata {
        async fn resolve(&self, _url: &CatalogUrl) -> Result<CatalogEntry, MetadataError> {
            self.entry
                .clone()
                .ok_or_else(|| MetadataError::Status { status: 503, body: "unavailable".into() })
        }
    }

    /// Writes `<query>.mp3` unless the query is listed as failing.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub failing: HashSet<String>,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TrackFetcher for FakeFetcher {
        async fn fetch(&self, query: &str, folder: &Path) -> Result<(), FetchError> {
            self.calls.lock().unwrap().push(query.to_string());
            if self.failing.contains(query) {
                return Err(FetchError::Failed(format!("no results for {}", query)));
            }
            tokio::fs::write(folder.join(format!("{}.mp3", query)), b"")
                .await
                .map_err(FetchError::Spawn)
        }
    }

    pub fn album(tracks: &[(&str, &str)]) -> CatalogEntry {
        CatalogEntry {
            kind: MediaKind::Album,
            name: "Greatest Hits".to_string(),
            tracks: tracks.iter().map(|(n, a)| TrackRef::new(*n, *a)).collect(),
        }
    }

    fn processor(
        entry: Option<CatalogEntry>,
        fetcher: Arc<FakeFetcher>,
        bus: Arc<MemoryProgressBus>,
        root: &Path,
    ) -> JobProcessor {
        JobProcessor::new(
            Arc::new(FakeMetadata { entry }),
            fetcher,
            ProgressPublisher::new(bus),
            root,
        )
    }

    #[tokio::test]
    async fn test_track_exists_matching() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("Artist - My Song (Official).mp3"), b"").await.unwrap();
        tokio::fs::write(dir.path().join("Other Song.webm"), b"").await.unwrap();

        assert!(track_exists(dir.path(), "my song").await.unwrap());
        assert!(!track_exists(dir.path(), "Other Song").await.unwrap());
        assert!(!track_exists(dir.path(), "").await.unwrap());
        assert!(!track_exists(&dir.path().join("missing"), "x").await.unwrap());
    }

    #[test]
    fn test_fold_outcomes() {
        assert!(fold_outcomes(&[]).is_ok());
        assert!(fold_outcomes(&[TrackOutcome::Failed("a".into()), TrackOutcome::Skipped]).is_ok());
        assert_eq!(fold_outcomes(&[TrackOutcome::Failed("boom".into())]), Err("boom".to_string()));
        assert!(fold_outcomes(&[TrackOutcome::Failed("a".into()), TrackOutcome::Failed("b".into())])
            .unwrap_err()
            .contains("all 2 tracks failed"));
    }

    #[tokio::test]
    async fn test_album_flow_events_and_skip() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MemoryProgressBus::new());
        let fetcher = Arc::new(FakeFetcher {
            failing: HashSet::from(["Broken B".to_string()]),
            ..Default::default()
        });
        let entry = album(&[("One", "A"), ("Broken", "B"), ("Three", "C")]);

        let folder = dir.path().join("album").join("Greatest Hits");
        tokio::fs::create_dir_all(&folder).await.unwrap();
        tokio::fs::write(folder.join("three.mp3"), b"").await.unwrap();

        let processor = processor(Some(entry), fetcher.clone(), bus.clone(), dir.path());
        let job = Job::new("https://open.spotify.com/album/xyz");
        let mut events = bus.subscribe(&job.id).await.unwrap();

        let payload = processor.process(&job).await.unwrap();
        assert_eq!(payload, "Greatest Hits");
        assert_eq!(*fetcher.calls.lock().unwrap(), vec!["One A", "Broken B"]);

        let mut types = Vec::new();
        for _ in 0..7 {
            types.push(events.next().await.unwrap().event_type);
        }
        assert_eq!(
            types,
            vec![
                ProgressEventType::Started,
                ProgressEventType::Info,
                ProgressEventType::Downloading,
                ProgressEventType::Downloaded,
                ProgressEventType::Downloading,
                ProgressEventType::TrackFailed,
                ProgressEventType::Skipped,
            ]
        );
    }

    #[tokio::test]
    async fn test_dot_named_entry_stays_inside_kind_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("downloads");
        let fetcher = Arc::new(FakeFetcher::default());
        let mut entry = album(&[("One", "A")]);
        entry.name = "..".to_string();

        let processor = processor(
            Some(entry),
            fetcher,
            Arc::new(MemoryProgressBus::new()),
            &root,
        );
        let payload = processor
            .process(&Job::new("https://open.spotify.com/album/xyz"))
            .await
            .unwrap();

        assert_eq!(payload, "album-xyz");
        assert!(root.join("album").join("album-xyz").join("One A.mp3").exists());
        assert!(!root.join("One A.mp3").exists());
    }

    #[tokio::test]
    async fn test_all_tracks_failed_is_job_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher {
            failing: HashSet::from(["One A".to_string(), "Two B".to_string()]),
            ..Default::default()
        });
        let processor = processor(
            Some(album(&[("One", "A"), ("Two", "B")])),
            fetcher,
            Arc::new(MemoryProgressBus::new()),
            dir.path(),
        );

        let err = processor
            .process(&Job::new("https://open.spotify.com/album/xyz"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_url_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(
            None,
            Arc::new(FakeFetcher::default()),
            Arc::new(MemoryProgressBus::new()),
            dir.path(),
        );

        let err = processor.process(&Job::new("https://example.com/video/1")).await.unwrap_err();
        assert!(err.is_permanent_failure());
    }

    #[tokio::test]
    async fn test_metadata_failure_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(
            None,
            Arc::new(FakeFetcher::default()),
            Arc::new(MemoryProgressBus::new()),
            dir.path(),
        );

        let err = processor
            .process(&Job::new("https://open.spotify.com/track/abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Metadata(_)));
        assert!(err.is_retryable());
    }
}
