// crates/server/src/routes/mod.rs
//! API route handlers for the docharvest server.

pub mod health;
pub mod jobs;
pub mod schedules;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET    /api/health                — health check
/// - POST   /api/jobs                  — create a job (optional auto_start)
/// - GET    /api/jobs                  — list jobs (filter + pagination)
/// - GET    /api/jobs/{id}             — job + latest progress snapshot
/// - POST   /api/jobs/{id}/start       — start
/// - POST   /api/jobs/{id}/pause       — pause
/// - POST   /api/jobs/{id}/resume     — resume
/// - POST   /api/jobs/{id}/cancel      — cancel
/// - DELETE /api/jobs/{id}             — delete (cancels first if active)
/// - GET    /api/jobs/{id}/stream      — SSE progress stream
/// - POST   /api/schedules             — create a schedule definition
/// - GET    /api/schedules             — list schedule definitions
/// - PUT    /api/schedules/{id}        — update a definition
/// - POST   /api/schedules/{id}/toggle — enable/disable
/// - DELETE /api/schedules/{id}        — delete a definition
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", schedules::router())
        .with_state(state)
}
