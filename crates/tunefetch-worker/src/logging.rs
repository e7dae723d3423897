//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use tunefetch_models::Job;

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job ID, source URL and attempt number.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    url: String,
    attempt: u32,
}

impl JobLogger {
    /// Create a new job logger for a claimed job.
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            url: job.url.clone(),
            attempt: job.attempt,
        }
    }

    /// Log the start of processing.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            url = %self.url,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job progress: {}", message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            url = %self.url,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            url = %self.url,
            attempt = self.attempt
        )
    }
}
