// crates/server/src/routes/schedules.rs
//! Schedule definition API.
//!
//! - POST   /schedules               — create
//! - GET    /schedules               — list
//! - PUT    /schedules/{id}          — partial update
//! - POST   /schedules/{id}/toggle   — enable/disable
//! - DELETE /schedules/{id}          — delete

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use docharvest_core::{CronExpression, JobConfig, JobType};
use docharvest_db::{NewSchedule, ScheduleRecord, ScheduleUpdate};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct CreateScheduleRequest {
    name: String,
    target_job_type: JobType,
    cron_expression: String,
    config: serde_json::Value,
    #[serde(default)]
    is_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct UpdateScheduleRequest {
    name: Option<String>,
    cron_expression: Option<String>,
    config: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    message: &'static str,
    id: i64,
}

fn parse_cron(expr: &str) -> ApiResult<CronExpression> {
    expr.parse::<CronExpression>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn next_fire(expr: &CronExpression) -> Option<chrono::DateTime<Utc>> {
    expr.next_after(Utc::now().naive_utc())
        .and_then(|t| Utc.from_local_datetime(&t).single())
}

/// POST /api/schedules
async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateScheduleRequest>,
) -> ApiResult<(StatusCode, Json<ScheduleRecord>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("schedule name must not be empty".into()));
    }
    let expr = parse_cron(&req.cron_expression)?;
    // The template must already be a valid config for the target type;
    // firing is not the moment to discover a typo.
    JobConfig::from_value(req.target_job_type, req.config.clone())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if state.db.schedule_name_exists(req.name.trim()).await? {
        return Err(ApiError::BadRequest(format!(
            "schedule name already exists: {}",
            req.name.trim()
        )));
    }

    let record = state
        .db
        .insert_schedule(&NewSchedule {
            name: req.name.trim(),
            target_job_type: req.target_job_type,
            cron_expression: expr.as_str(),
            config: &req.config,
            is_enabled: req.is_enabled,
            next_run_time: next_fire(&expr),
        })
        .await?;
    tracing::info!(schedule_id = record.id, name = %record.name, "schedule created");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/schedules
async fn list_schedules(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ScheduleRecord>>> {
    Ok(Json(state.db.list_schedules().await?))
}

/// PUT /api/schedules/{id}
async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateScheduleRequest>,
) -> ApiResult<Json<ScheduleRecord>> {
    let existing = state
        .db
        .get_schedule(id)
        .await?
        .ok_or(ApiError::ScheduleNotFound(id))?;

    let mut next_run_time = None;
    let expr_text;
    let mut update = ScheduleUpdate::default();

    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("schedule name must not be empty".into()));
        }
        update.name = Some(name.trim());
    }
    if let Some(expr) = &req.cron_expression {
        let parsed = parse_cron(expr)?;
        next_run_time = Some(next_fire(&parsed));
        expr_text = parsed.as_str().to_string();
        update.cron_expression = Some(&expr_text);
    }
    if let Some(config) = &req.config {
        JobConfig::from_value(existing.target_job_type, config.clone())
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        update.config = Some(config);
    }
    update.next_run_time = next_run_time;

    let record = state
        .db
        .update_schedule(id, &update)
        .await?
        .ok_or(ApiError::ScheduleNotFound(id))?;
    Ok(Json(record))
}

/// POST /api/schedules/{id}/toggle
async fn toggle_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<Json<ScheduleRecord>> {
    let record = state
        .db
        .set_schedule_enabled(id, req.enabled)
        .await?
        .ok_or(ApiError::ScheduleNotFound(id))?;

    // Re-enabling refreshes the advertised next fire time.
    if req.enabled {
        if let Ok(expr) = record.cron_expression.parse::<CronExpression>() {
            let record = state
                .db
                .update_schedule(
                    id,
                    &ScheduleUpdate {
                        next_run_time: Some(next_fire(&expr)),
                        ..Default::default()
                    },
                )
                .await?
                .ok_or(ApiError::ScheduleNotFound(id))?;
            return Ok(Json(record));
        }
    }
    tracing::info!(schedule_id = id, enabled = req.enabled, "schedule toggled");
    Ok(Json(record))
}

/// DELETE /api/schedules/{id}
async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteResponse>> {
    if !state.db.delete_schedule(id).await? {
        return Err(ApiError::ScheduleNotFound(id));
    }
    Ok(Json(DeleteResponse {
        message: "schedule deleted",
        id,
    }))
}

/// Build the schedules router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/schedules", post(create_schedule).get(list_schedules))
        .route("/schedules/{id}", put(update_schedule).delete(delete_schedule))
        .route("/schedules/{id}/toggle", post(toggle_schedule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testutil::{request, test_app};

    fn schedule_body(name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "target_job_type": "backup",
            "cron_expression": "0 2 * * *",
            "config": { "kind": "full" },
        })
    }

    #[tokio::test]
    async fn test_create_and_list_schedules() {
        let (app, _state) = test_app().await;
        let (status, created) =
            request(app.clone(), "POST", "/api/schedules", Some(schedule_body("nightly"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "nightly");
        assert_eq!(created["is_enabled"], false);
        assert!(created["next_run_time"].is_string());

        let (_, list) = request(app, "GET", "/api/schedules", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_cron() {
        let (app, _state) = test_app().await;
        let mut body = schedule_body("broken");
        body["cron_expression"] = json!("not a cron");
        let (status, response) = request(app, "POST", "/api/schedules", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["details"].as_str().unwrap().contains("5 fields"));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_template_config() {
        let (app, _state) = test_app().await;
        let body = json!({
            "name": "broken",
            "target_job_type": "collection",
            "cron_expression": "0 2 * * *",
            "config": { "sources": [] },
        });
        let (status, _) = request(app, "POST", "/api/schedules", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let (app, _state) = test_app().await;
        request(app.clone(), "POST", "/api/schedules", Some(schedule_body("nightly"))).await;
        let (status, body) =
            request(app, "POST", "/api/schedules", Some(schedule_body("nightly"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].as_str().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn test_toggle_schedule() {
        let (app, _state) = test_app().await;
        let (_, created) =
            request(app.clone(), "POST", "/api/schedules", Some(schedule_body("nightly"))).await;
        let id = created["id"].as_i64().unwrap();

        let (status, toggled) = request(
            app.clone(),
            "POST",
            &format!("/api/schedules/{id}/toggle"),
            Some(json!({ "enabled": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(toggled["is_enabled"], true);

        let (_, toggled) = request(
            app,
            "POST",
            &format!("/api/schedules/{id}/toggle"),
            Some(json!({ "enabled": false })),
        )
        .await;
        assert_eq!(toggled["is_enabled"], false);
    }

    #[tokio::test]
    async fn test_update_schedule() {
        let (app, _state) = test_app().await;
        let (_, created) =
            request(app.clone(), "POST", "/api/schedules", Some(schedule_body("nightly"))).await;
        let id = created["id"].as_i64().unwrap();

        let (status, updated) = request(
            app.clone(),
            "PUT",
            &format!("/api/schedules/{id}"),
            Some(json!({ "cron_expression": "30 4 * * 0" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["cron_expression"], "30 4 * * 0");
        assert_eq!(updated["name"], "nightly");

        // Bad replacement config for the target type is rejected.
        let (status, _) = request(
            app,
            "PUT",
            &format!("/api/schedules/{id}"),
            Some(json!({ "config": { "kind": "differential" } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_schedule_is_404() {
        let (app, _state) = test_app().await;
        let (status, _) = request(
            app.clone(),
            "POST",
            "/api/schedules/404/toggle",
            Some(json!({ "enabled": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = request(app, "DELETE", "/api/schedules/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
