// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use docharvest_core::{JobId, JobStatus};
use docharvest_db::DbError;

use crate::jobs::lifecycle::LifecycleError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(i64),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job already running: {0}")]
    AlreadyRunning(JobId),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(id) => ApiError::JobNotFound(id),
            LifecycleError::InvalidTransition { from, to } => {
                ApiError::InvalidTransition { from, to }
            }
            LifecycleError::AlreadyRunning(id) => ApiError::AlreadyRunning(id),
            LifecycleError::Db(e) => ApiError::Database(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::JobNotFound(id) => {
                tracing::warn!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
                )
            }
            ApiError::ScheduleNotFound(id) => {
                tracing::warn!(schedule_id = %id, "Schedule not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details(
                        "Schedule not found",
                        format!("Schedule ID: {}", id),
                    ),
                )
            }
            ApiError::InvalidTransition { from, to } => {
                tracing::warn!(%from, %to, "Invalid lifecycle transition");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details(
                        "Invalid transition",
                        format!("{} -> {}", from, to),
                    ),
                )
            }
            ApiError::AlreadyRunning(id) => {
                tracing::warn!(job_id = %id, "Job already running");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details("Job already running", format!("Job ID: {}", id)),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Database(db_err) => {
                tracing::error!(error = %db_err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_details("Database error", db_err.to_string()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
