//! Job definitions for queue processing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Current on-disk schema version of [`Job`] records.
pub const JOB_SCHEMA_VERSION: u32 = 1;

/// Current time truncated to the millisecond precision records are stored with.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

fn default_schema_version() -> u32 {
    // Records written before versioning existed are version 1.
    1
}

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID (32 lowercase hex characters).
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the pending queue
    #[default]
    Pending,
    /// Claimed by the scheduler
    Processing,
    /// Finished successfully
    Done,
    /// Failed permanently
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Pending or processing: the job still occupies its URL.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of download work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Record layout version
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Unique job ID
    pub id: JobId,

    /// Source catalog URL, also the dedup key
    pub url: String,

    /// Current status
    pub status: JobStatus,

    /// Number of failed processing passes so far
    #[serde(default)]
    pub attempt: u32,

    /// Name of the produced artifact folder (set on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    /// Last error message (set on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job for a URL.
    pub fn new(url: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            schema_version: JOB_SCHEMA_VERSION,
            id: JobId::new(),
            url: url.into(),
            status: JobStatus::Pending,
            attempt: 0,
            payload: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status, refreshing `updated_at`.
    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = now_millis();
    }

    /// Claim: pending -> processing.
    pub fn mark_processing(&mut self) {
        self.transition(JobStatus::Processing);
    }

    /// Return to the queue with one more attempt recorded.
    pub fn mark_retry(&mut self, error: Option<String>) {
        self.attempt += 1;
        if error.is_some() {
            self.error = error;
        }
        self.transition(JobStatus::Pending);
    }

    /// Finish successfully.
    pub fn mark_done(&mut self, payload: impl Into<String>) {
        self.payload = Some(payload.into());
        self.error = None;
        self.transition(JobStatus::Done);
    }

    /// Fail permanently.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(JobStatus::Failed);
    }

    /// Time elapsed since the last status transition.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }

    /// True when the job sits in `processing` for longer than `threshold`.
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.age(now) > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_hex() {
        let id = JobId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, JobId::new());
    }

    #[test]
    fn test_job_serialization_layout() {
        let job = Job::new("https://open.spotify.com/track/abc");
        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["status"], "pending");
        assert_eq!(json["schemaVersion"], 1);
        assert_eq!(json["attempt"], 0);
        assert!(json["createdAt"].is_i64());
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_legacy_record_without_version() {
        let raw = r#"{"id":"abc","url":"u","status":"done","attempt":1,
            "payload":"Song - Artist","createdAt":1700000000000,"updatedAt":1700000000500}"#;
        let job: Job = serde_json::from_str(raw).unwrap();

        assert_eq!(job.schema_version, 1);
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.payload.as_deref(), Some("Song - Artist"));
        assert_eq!(job.updated_at.timestamp_millis(), 1_700_000_000_500);
    }

    #[test]
    fn test_retry_increments_attempt() {
        let mut job = Job::new("u");
        job.mark_processing();
        job.mark_retry(Some("boom".into()));

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_staleness() {
        let mut job = Job::new("u");
        job.mark_processing();
        let threshold = Duration::minutes(5);

        assert!(!job.is_stale(threshold, job.updated_at + Duration::minutes(4)));
        assert!(job.is_stale(threshold, job.updated_at + Duration::minutes(6)));

        job.transition(JobStatus::Pending);
        assert!(!job.is_stale(threshold, job.updated_at + Duration::minutes(6)));
    }
}
