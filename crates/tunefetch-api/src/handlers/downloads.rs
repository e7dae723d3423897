//! Job submission and lookup.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use tunefetch_models::Job;
use tunefetch_queue::EnqueueDisposition;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub message: String,
    pub status: bool,
    pub job: Job,
    pub disposition: EnqueueDisposition,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub message: String,
    pub status: bool,
    pub job: Vec<Job>,
}

fn required_url(url: Option<String>) -> ApiResult<String> {
    match url.map(|u| u.trim().to_string()) {
        Some(url) if !url.is_empty() => Ok(url),
        _ => Err(ApiError::bad_request("url is required")),
    }
}

/// `POST /download`: enqueue a URL, or return the job already covering it.
pub async fn submit_download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<SubmitResponse>> {
    let url = required_url(request.url)?;
    let outcome = state.queue.enqueue(&url).await?;

    info!(
        job_id = %outcome.job.id,
        url = %url,
        disposition = ?outcome.disposition,
        "Download requested"
    );
    metrics::record_submission(outcome.disposition);

    let message = match outcome.disposition {
        EnqueueDisposition::Enqueued => "Job added to the queue",
        EnqueueDisposition::InFlight => "Job already queued",
        EnqueueDisposition::Cached => "Job already completed",
    };

    Ok(Json(SubmitResponse {
        message: message.to_string(),
        status: true,
        job: outcome.job,
        disposition: outcome.disposition,
    }))
}

/// `GET /download?url=`: the job for a URL, as a zero- or one-element list.
pub async fn lookup_download(
    State(state): State<AppState>,
    Query(request): Query<DownloadRequest>,
) -> ApiResult<Json<LookupResponse>> {
    let url = required_url(request.url)?;
    let job = state.queue.lookup_by_url(&url).await?;

    Ok(Json(LookupResponse {
        message: "Job lookup complete".to_string(),
        status: true,
        job: job.into_iter().collect(),
    }))
}
