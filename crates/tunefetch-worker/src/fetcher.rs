//! Audio fetching via yt-dlp.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to launch downloader: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Downloads one track, found by free-text search, into a folder.
#[async_trait]
pub trait TrackFetcher: Send + Sync {
    async fn fetch(&self, query: &str, folder: &Path) -> Result<(), FetchError>;
}

/// Searches and extracts mp3 audio with yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: String,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(query: &str, folder: &Path) -> Vec<String> {
        vec![
            format!("ytsearch1:{}", query),
            "-x".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
            "-o".to_string(),
            format!("{}/%(title)s.%(ext)s", folder.display()),
        ]
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl TrackFetcher for YtDlpFetcher {
    async fn fetch(&self, query: &str, folder: &Path) -> Result<(), FetchError> {
        let args = Self::args(query, folder);
        debug!("Running {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            let error_msg = stderr.lines().last().unwrap_or("Unknown error");
            return Err(FetchError::Failed(format!("yt-dlp failed: {}", error_msg)));
        }

        Ok(())
    }
}
