// crates/server/src/routes/jobs.rs
//! Job control API and the SSE progress stream.
//!
//! - POST   /jobs                 — create (optional `auto_start`)
//! - GET    /jobs                 — list, filtered + paginated
//! - GET    /jobs/{id}            — job + latest snapshot (polling path)
//! - POST   /jobs/{id}/start      — start
//! - POST   /jobs/{id}/pause      — pause
//! - POST   /jobs/{id}/resume     — resume (start from paused)
//! - POST   /jobs/{id}/cancel     — cancel
//! - DELETE /jobs/{id}            — delete (cancels first when active)
//! - GET    /jobs/{id}/stream     — SSE progress stream

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use docharvest_core::{JobConfig, JobId, JobStatus, JobType};
use docharvest_db::{JobDetail, JobFilter, JobPage};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::stream::{ProgressFrame, StreamEvent};

/// Interval between SSE heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    name: String,
    job_type: JobType,
    config: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CreateJobParams {
    #[serde(default)]
    auto_start: bool,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    job_type: Option<JobType>,
    status: Option<JobStatus>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    /// Auth token for transports that cannot set headers. Validation
    /// belongs to the authentication layer in front of this service.
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    message: &'static str,
    id: JobId,
}

/// POST /api/jobs
async fn create_job(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CreateJobParams>,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobDetail>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("job name must not be empty".into()));
    }
    let config = JobConfig::from_value(req.job_type, req.config)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let record = state.db.insert_job(req.name.trim(), &config).await?;
    let id = record.id;
    tracing::info!(job_id = id, job_type = %req.job_type, "job created");

    if params.auto_start {
        if let Err(e) = state.supervisor.start(id).await {
            tracing::warn!(job_id = id, error = %e, "auto-start failed");
        }
    }

    let record = state
        .db
        .get_job(id)
        .await?
        .ok_or(ApiError::JobNotFound(id))?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /api/jobs
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<JobPage>> {
    let page = state
        .db
        .list_jobs(&JobFilter {
            job_type: params.job_type,
            status: params.status,
            page: params.page,
            page_size: params.page_size,
        })
        .await?;
    Ok(Json(page))
}

/// GET /api/jobs/{id} — the polling fallback. Returns exactly the shape
/// push subscribers assemble from `task_update` events.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobDetail>> {
    let record = state
        .db
        .get_job(id)
        .await?
        .ok_or(ApiError::JobNotFound(id))?;
    Ok(Json(record.into()))
}

/// POST /api/jobs/{id}/start
async fn start_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobDetail>> {
    let record = state.supervisor.start(id).await?;
    Ok(Json(record.into()))
}

/// POST /api/jobs/{id}/pause
async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobDetail>> {
    let record = state.supervisor.pause(id).await?;
    Ok(Json(record.into()))
}

/// POST /api/jobs/{id}/resume
async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobDetail>> {
    let record = state.supervisor.start(id).await?;
    Ok(Json(record.into()))
}

/// POST /api/jobs/{id}/cancel
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobDetail>> {
    let record = state.supervisor.cancel(id).await?;
    Ok(Json(record.into()))
}

/// DELETE /api/jobs/{id}
async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<DeleteResponse>> {
    state.supervisor.delete(id).await?;
    Ok(Json(DeleteResponse {
        message: "job deleted",
        id,
    }))
}

/// GET /api/jobs/{id}/stream — SSE progress stream.
///
/// Delivery order per subscription: `connection_established`, then a
/// `task_update` with the current snapshot (a mid-run subscriber sees the
/// job's real counters immediately, never a zeroed snapshot), then every
/// subsequent event, with heartbeats in between. The stream closes after
/// forwarding a terminal `task_update`.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if params.token.is_some() {
        tracing::debug!(job_id = id, "stream token received, validation delegated upstream");
    }
    state
        .db
        .get_job(id)
        .await?
        .ok_or(ApiError::JobNotFound(id))?;
    // Subscribe before the snapshot read: an event landing in between is
    // delivered twice rather than lost, and snapshots are idempotent.
    let rx = state.hub.subscribe(id);
    let record = state
        .db
        .get_job(id)
        .await?
        .ok_or(ApiError::JobNotFound(id))?;

    let initial = ProgressFrame::from_record(&record);
    let terminal_at_connect = record.status.is_terminal();

    let stream = async_stream::stream! {
        yield Ok(sse_event(&StreamEvent::ConnectionEstablished {
            task_id: id,
            message: "connection established".into(),
        }));
        yield Ok(sse_event(&StreamEvent::TaskUpdate(initial)));
        if terminal_at_connect {
            return;
        }

        let mut rx = rx;
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    yield Ok(sse_event(&StreamEvent::Heartbeat {
                        message: "connection alive".into(),
                    }));
                }
                msg = rx.recv() => match msg {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        yield Ok(sse_event(&event));
                        if terminal {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Snapshots are idempotent; dropped intermediates
                        // are recovered by the next one.
                        tracing::debug!(job_id = id, skipped, "slow subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    };

    Ok(Sse::new(stream))
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default().data(serde_json::to_string(event).unwrap_or_default())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/start", post(start_job))
        .route("/jobs/{id}/pause", post(pause_job))
        .route("/jobs/{id}/resume", post(resume_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/stream", get(stream_job))
}
