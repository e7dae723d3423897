//! Live job progress over Server-Sent Events.
//!
//! Each subscription frame becomes one SSE event: control frames and progress
//! events carry their JSON as `data`, heartbeats become `:` comment lines. The
//! response ends when the subscription stream does.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use tunefetch_models::{JobId, StreamFrame};
use tunefetch_queue::subscribe_stream;

use crate::metrics;
use crate::state::AppState;

/// `GET /progress/:job_id`
pub async fn progress_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_id = JobId::from_string(job_id);
    debug!(job_id = %job_id, "Progress subscriber connected");
    metrics::record_progress_subscription();

    let frames = subscribe_stream(state.bus.clone(), job_id, state.config.subscription());
    Sse::new(frames.map(|frame| Ok(to_event(&frame))))
}

fn to_event(frame: &StreamFrame) -> Event {
    match frame {
        StreamFrame::Heartbeat => Event::default().comment("heartbeat"),
        other => match other.to_json() {
            Some(json) => Event::default().data(json),
            None => {
                warn!("Dropping unserializable progress frame");
                Event::default().comment("unserializable frame")
            }
        },
    }
}
