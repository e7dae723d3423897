//! Progress event schemas.
//!
//! Events are ephemeral: they are published to whoever is subscribed at the
//! time and never stored.

use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus};

/// Kind of progress checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    /// Job claimed, work begins
    Started,
    /// A track fetch is starting
    Downloading,
    /// A track fetch finished
    Downloaded,
    /// Track output already present, fetch skipped
    Skipped,
    /// A single track failed (job continues)
    TrackFailed,
    /// Collection resolved
    Info,
    /// Job finished successfully
    Completed,
    /// Job failed after exhausting retries
    Failed,
    /// Job rejected (unrecognised URL)
    Error,
}

impl ProgressEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventType::Started => "started",
            ProgressEventType::Downloading => "downloading",
            ProgressEventType::Downloaded => "downloaded",
            ProgressEventType::Skipped => "skipped",
            ProgressEventType::TrackFailed => "track_failed",
            ProgressEventType::Info => "info",
            ProgressEventType::Completed => "completed",
            ProgressEventType::Failed => "failed",
            ProgressEventType::Error => "error",
        }
    }
}

/// Progress update published on a job's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub message: String,
    /// 0-100
    pub progress: u8,
    pub total: u32,
    pub current: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

/// Percentage of `current` out of `total`, rounded and clamped to 100.
pub fn percent(current: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let value = (f64::from(current) / f64::from(total) * 100.0).round();
    value.clamp(0.0, 100.0) as u8
}

impl ProgressEvent {
    fn processing(
        job_id: &JobId,
        event_type: ProgressEventType,
        message: impl Into<String>,
        progress: u8,
        total: u32,
        current: u32,
    ) -> Self {
        Self {
            job_id: job_id.clone(),
            status: JobStatus::Processing,
            event_type,
            message: message.into(),
            progress,
            total,
            current,
            current_track: None,
            error: None,
            payload: None,
            collection_name: None,
        }
    }

    /// Work on the job has begun.
    pub fn started(job_id: &JobId) -> Self {
        Self::processing(job_id, ProgressEventType::Started, "Starting download...", 0, 1, 0)
    }

    /// A collection was resolved to `total` tracks.
    pub fn info(
        job_id: &JobId,
        collection_name: &str,
        message: impl Into<String>,
        total: u32,
    ) -> Self {
        let mut event = Self::processing(job_id, ProgressEventType::Info, message, 0, total, 0);
        event.collection_name = Some(collection_name.to_string());
        event
    }

    /// Fetch of track `index` (zero-based) is about to start.
    pub fn downloading(job_id: &JobId, track: &str, index: u32, total: u32) -> Self {
        let number = index + 1;
        let mut event = Self::processing(
            job_id,
            ProgressEventType::Downloading,
            format!("Downloading ({}/{}): {}", number, total, track),
            percent(index, total),
            total,
            number,
        );
        event.current_track = Some(track.to_string());
        event
    }

    /// Fetch of track `index` finished.
    pub fn downloaded(job_id: &JobId, track: &str, index: u32, total: u32) -> Self {
        let number = index + 1;
        let mut event = Self::processing(
            job_id,
            ProgressEventType::Downloaded,
            format!("Finished ({}/{}): {}", number, total, track),
            percent(number, total),
            total,
            number,
        );
        event.current_track = Some(track.to_string());
        event
    }

    /// Track `index` already exists on disk.
    pub fn skipped(job_id: &JobId, track: &str, index: u32, total: u32) -> Self {
        let number = index + 1;
        let mut event = Self::processing(
            job_id,
            ProgressEventType::Skipped,
            format!("Skipped ({}/{}): {} (already exists)", number, total, track),
            percent(number, total),
            total,
            number,
        );
        event.current_track = Some(track.to_string());
        event
    }

    /// Track `index` failed; the job carries on.
    pub fn track_failed(job_id: &JobId, track: &str, index: u32, total: u32, error: &str) -> Self {
        let number = index + 1;
        let mut event = Self::processing(
            job_id,
            ProgressEventType::TrackFailed,
            format!("Failed ({}/{}): {}", number, total, track),
            percent(number, total),
            total,
            number,
        );
        event.current_track = Some(track.to_string());
        event.error = Some(error.to_string());
        event
    }

    /// Job finished; `payload` names the output folder.
    pub fn completed(job_id: &JobId, payload: &str) -> Self {
        Self {
            job_id: job_id.clone(),
            status: JobStatus::Done,
            event_type: ProgressEventType::Completed,
            message: "Download complete!".to_string(),
            progress: 100,
            total: 0,
            current: 0,
            current_track: None,
            error: None,
            payload: Some(payload.to_string()),
            collection_name: None,
        }
    }

    /// Job failed permanently after its attempt budget.
    pub fn failed(job_id: &JobId, error: &str) -> Self {
        Self {
            job_id: job_id.clone(),
            status: JobStatus::Failed,
            event_type: ProgressEventType::Failed,
            message: format!("Download failed: {}", error),
            progress: 0,
            total: 0,
            current: 0,
            current_track: None,
            error: Some(error.to_string()),
            payload: None,
            collection_name: None,
        }
    }

    /// Job rejected because its URL is not a recognised catalog link.
    pub fn invalid_url(job_id: &JobId, error: &str) -> Self {
        Self {
            job_id: job_id.clone(),
            status: JobStatus::Failed,
            event_type: ProgressEventType::Error,
            message: "Invalid URL".to_string(),
            progress: 0,
            total: 0,
            current: 0,
            current_track: None,
            error: Some(error.to_string()),
            payload: None,
            collection_name: None,
        }
    }

    /// `done` or `failed`: no more events follow.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Out-of-band frames of a progress subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Handshake sent first on every subscription
    Connected {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    /// Live updates are unavailable; the client should poll the job instead
    Fallback {
        #[serde(rename = "jobId")]
        job_id: JobId,
        mode: String,
        message: String,
    },
}

impl ControlFrame {
    pub fn connected(job_id: &JobId) -> Self {
        ControlFrame::Connected { job_id: job_id.clone() }
    }

    pub fn polling_fallback(job_id: &JobId, reason: impl Into<String>) -> Self {
        ControlFrame::Fallback {
            job_id: job_id.clone(),
            mode: "polling".to_string(),
            message: reason.into(),
        }
    }
}

/// One item of a progress subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Control(ControlFrame),
    Event(ProgressEvent),
    /// Keep-alive while idle
    Heartbeat,
}

impl StreamFrame {
    /// JSON body of the frame; heartbeats carry none.
    pub fn to_json(&self) -> Option<String> {
        match self {
            StreamFrame::Control(frame) => serde_json::to_string(frame).ok(),
            StreamFrame::Event(event) => serde_json::to_string(event).ok(),
            StreamFrame::Heartbeat => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        let id = JobId::from_string("j1");
        let event = ProgressEvent::track_failed(&id, "Song - Artist", 1, 4, "nope");
        let json = serde_json::to_value(event).unwrap();

        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["type"], "track_failed");
        assert_eq!(json["currentTrack"], "Song - Artist");
        assert_eq!(json["current"], 2);
        assert_eq!(json["progress"], 50);
        assert_eq!(json["error"], "nope");
    }

    #[test]
    fn test_downloading_reports_progress_before_track() {
        let id = JobId::new();
        let event = ProgressEvent::downloading(&id, "t", 0, 3);
        assert_eq!(event.progress, 0);
        assert_eq!(event.current, 1);

        let event = ProgressEvent::downloaded(&id, "t", 0, 3);
        assert_eq!(event.progress, 33);
    }

    #[test]
    fn test_terminal_events() {
        let id = JobId::new();
        assert!(ProgressEvent::completed(&id, "Album").is_terminal());
        assert!(ProgressEvent::failed(&id, "x").is_terminal());
        assert!(ProgressEvent::invalid_url(&id, "x").is_terminal());
        assert!(!ProgressEvent::started(&id).is_terminal());
    }

    #[test]
    fn test_control_frames() {
        let id = JobId::from_string("j2");
        let json = StreamFrame::Control(ControlFrame::connected(&id)).to_json().unwrap();
        assert_eq!(json, r#"{"type":"connected","jobId":"j2"}"#);

        let json = StreamFrame::Control(ControlFrame::polling_fallback(&id, "down"))
            .to_json()
            .unwrap();
        assert!(json.contains(r#""mode":"polling""#));
        assert!(StreamFrame::Heartbeat.to_json().is_none());
    }

    #[test]
    fn test_percent_bounds() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(5, 3), 100);
    }
}
