//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with a scrape endpoint on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| {
            WorkerError::config_error(format!("Failed to install Prometheus recorder: {}", e))
        })
}

/// Metric names as constants for consistency.
pub mod names {
    pub const QUEUE_LENGTH: &str = "tunefetch_queue_length";
    pub const JOBS_CLAIMED_TOTAL: &str = "tunefetch_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "tunefetch_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "tunefetch_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "tunefetch_jobs_retried_total";
    pub const JOBS_RECLAIMED_TOTAL: &str = "tunefetch_jobs_reclaimed_total";
    pub const JOBS_EXPIRED_TOTAL: &str = "tunefetch_jobs_expired_total";
}

pub fn record_claimed() {
    counter!(names::JOBS_CLAIMED_TOTAL).increment(1);
}

pub fn record_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

/// Record a permanent failure; `reason` is `exhausted` or `invalid`.
pub fn record_failed(reason: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_retried() {
    counter!(names::JOBS_RETRIED_TOTAL).increment(1);
}

pub fn record_reclaimed(count: usize) {
    counter!(names::JOBS_RECLAIMED_TOTAL).increment(count as u64);
}

pub fn record_expired(collection: &'static str, count: usize) {
    counter!(names::JOBS_EXPIRED_TOTAL, "collection" => collection).increment(count as u64);
}

pub fn set_queue_length(len: usize) {
    gauge!(names::QUEUE_LENGTH).set(len as f64);
}
