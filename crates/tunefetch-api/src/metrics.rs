//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use tunefetch_queue::EnqueueDisposition;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "tunefetch_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "tunefetch_http_request_duration_seconds";
    pub const JOBS_SUBMITTED_TOTAL: &str = "tunefetch_jobs_submitted_total";
    pub const PROGRESS_SUBSCRIPTIONS_TOTAL: &str = "tunefetch_progress_subscriptions_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_submission(disposition: EnqueueDisposition) {
    let disposition = match disposition {
        EnqueueDisposition::Enqueued => "enqueued",
        EnqueueDisposition::InFlight => "in_flight",
        EnqueueDisposition::Cached => "cached",
    };
    counter!(names::JOBS_SUBMITTED_TOTAL, "disposition" => disposition).increment(1);
}

pub fn record_progress_subscription() {
    counter!(names::PROGRESS_SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Metrics middleware for HTTP requests. Labels by route template so job ids
/// don't explode cardinality.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    record_http_request(&method, &route, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}
