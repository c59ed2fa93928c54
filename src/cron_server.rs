// src/cron_server.rs

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::notify::InMemoryNotificationStore;
use crate::reconcile::WorklogReconciler;
use crate::reconcile_guard::ReconcileGuard;
use crate::worklog_store::{
    InMemoryDraftStore, InMemoryDurableStore, InMemoryUserDirectory, StoreError,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self);
        let (status, message) = match &self {
            AppError::Store(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Store error: {}", e),
            ),
        };
        (status, Html(format!("<h1>Error</h1><p>{}</p>", message))).into_response()
    }
}

/// Shared state for the HTTP surface. Handlers reach the engine through
/// `reconciler`; the concrete stores are kept alongside so `/status` can
/// report counts without widening the store traits.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<WorklogReconciler>,
    pub guard: ReconcileGuard,
    pub directory: Arc<InMemoryUserDirectory>,
    pub drafts: Arc<InMemoryDraftStore>,
    pub durable: Arc<InMemoryDurableStore>,
    pub notifications: Arc<InMemoryNotificationStore>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    let cron_routes = Router::new()
        .route("/auto-submit-worklogs", post(handle_trigger))
        .route("/health", get(handle_cron_health));
    Router::new()
        .nest("/api/cron", cron_routes)
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
pub struct TriggerParams {
    token: Option<String>,
}

/// Accepts either `Authorization: Bearer <secret>` or `?token=<secret>`,
/// matching the hosted-cron providers that can only set one of the two.
fn authorized(headers: &HeaderMap, params: &TriggerParams, secret: &str) -> bool {
    let bearer = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim);
    if bearer == Some(secret) {
        return true;
    }
    params.token.as_deref() == Some(secret)
}

async fn handle_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerParams>,
) -> impl IntoResponse {
    if !authorized(&headers, &params, &state.config.cron_secret) {
        warn!("Unauthorized cron request attempt");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Unauthorized" })),
        );
    }

    info!("External cron job triggered");
    let summary = state.reconciler.run(Utc::now().date_naive()).await;

    // The trigger itself succeeded even when the run was skipped or failed;
    // the run outcome lives in `result`.
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "timestamp": Utc::now().to_rfc3339(),
            "result": summary,
        })),
    )
}

async fn handle_cron_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cron-endpoint",
        "timestamp": Utc::now().to_rfc3339(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "lastCompletedDate": state.guard.last_completed(),
    }))
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "env": state.config.environment,
    }))
}

async fn handle_status(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    info!("Handling /status request...");
    let user_count = state.directory.count()?;
    let draft_count = state.drafts.count()?;
    let durable_count = state.durable.count()?;
    let notification_count = state.notifications.count()?;
    let last_completed = state
        .guard
        .last_completed()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "never".to_string());

    let html_body = format!(
        "<h1>Worklog Auto-Submit Status</h1>\
         <p>Current Time (Server): {}</p><hr>\
         <p>Eligible Directory Users: {}</p>\
         <p>Pending Draft Entries: {}</p>\
         <p>Durable Ledger Entries: {}</p>\
         <p>Stored Notifications: {}</p><hr>\
         <p>Last Completed Run: {}</p>",
        chrono::Local::now().to_rfc3339(),
        user_count,
        draft_count,
        durable_count,
        notification_count,
        last_completed
    );
    Ok(Html(html_body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MockNotifier;
    use crate::worklog_data::{Role, User};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        envy::from_iter(vec![("CRON_SECRET".to_string(), "test-secret".to_string())])
            .expect("test config")
    }

    fn test_state() -> AppState {
        let directory = Arc::new(InMemoryUserDirectory::new());
        let drafts = Arc::new(InMemoryDraftStore::new());
        let durable = Arc::new(InMemoryDurableStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let guard = ReconcileGuard::new();
        let reconciler = Arc::new(WorklogReconciler::new(
            directory.clone(),
            drafts.clone(),
            durable.clone(),
            Arc::new(MockNotifier::new()),
            guard.clone(),
        ));
        AppState {
            reconciler,
            guard,
            directory,
            drafts,
            durable,
            notifications,
            config: Arc::new(test_config()),
            started_at: Instant::now(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_trigger_without_credentials_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/cron/auto-submit-worklogs")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_trigger_with_wrong_secret_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/cron/auto-submit-worklogs")
                    .header("Authorization", "Bearer nope")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_trigger_with_bearer_secret_runs_the_job() {
        let state = test_state();
        state
            .directory
            .add(User::new(
                "alice@example.com",
                "Alice",
                "Editorial_Maths",
                Role::Employee,
            ))
            .expect("seed user");

        let app = router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/cron/auto-submit-worklogs")
                    .header("Authorization", "Bearer test-secret")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["success"], true);
        assert_eq!(body["result"]["processed"], 1);
        assert_eq!(body["result"]["leaveAssigned"], 1);
    }

    #[tokio::test]
    async fn test_trigger_with_query_token_is_accepted() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/cron/auto-submit-worklogs?token=test-secret")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_second_trigger_reports_already_processed() {
        let app = router(test_state());

        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/cron/auto-submit-worklogs?token=test-secret")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/cron/auto-submit-worklogs?token=test-secret")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(second.status(), StatusCode::OK);
        let body = body_json(second).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["success"], false);
        assert_eq!(body["result"]["skipped"], true);
        assert_eq!(body["result"]["reason"], "already_processed");
    }

    #[tokio::test]
    async fn test_health_reports_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["env"], "development");
    }

    #[tokio::test]
    async fn test_cron_health_names_the_service() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/cron/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "cron-endpoint");
        assert!(body["lastCompletedDate"].is_null());
    }

    #[tokio::test]
    async fn test_status_page_renders_store_counts() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let page = String::from_utf8(bytes.to_vec()).expect("utf8 body");
        assert!(page.contains("Durable Ledger Entries: 0"));
        assert!(page.contains("Last Completed Run: never"));
    }
}
