// crates/server/src/testutil.rs
//! Shared helpers for route tests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use docharvest_db::Database;

use crate::state::AppState;
use crate::work::testing::{MockBackupProvider, MockPlan, MockSourceFactory};
use crate::create_app;

/// App over an in-memory store with empty mock plans.
pub(crate) async fn test_app() -> (Router, Arc<AppState>) {
    test_app_with_plans(Vec::new()).await
}

/// App over an in-memory store with scripted mock sources.
pub(crate) async fn test_app_with_plans(
    plans: Vec<(&str, MockPlan)>,
) -> (Router, Arc<AppState>) {
    let db = Database::new_in_memory().await.unwrap();
    let factory = MockSourceFactory::new();
    for (name, plan) in plans {
        factory.set_plan(name, plan);
    }
    let state = AppState::new(db, factory, Arc::new(MockBackupProvider { fail: false }));
    (create_app(Arc::clone(&state)), state)
}

/// Issue one request and parse the JSON body (Null when empty).
pub(crate) async fn request(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}
