// crates/server/src/lib.rs
//! Docharvest server library.
//!
//! Axum-based HTTP server for the docharvest job engine: a control API
//! for long-running collection/backup jobs, an SSE streaming gateway for
//! progress delivery, and a cron scheduler spawning recurring instances.

pub mod error;
pub mod jobs;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod stream;
pub mod work;

#[cfg(test)]
mod testutil;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::api_routes;
pub use scheduler::Scheduler;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, schedules, streaming)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api_routes(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use crate::testutil::{request, test_app};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _state) = test_app().await;
        let (status, body) = request(app, "GET", "/api/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (app, _state) = test_app().await;
        let (status, _body) = request(app, "GET", "/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
