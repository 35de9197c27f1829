//! HTTP surface — public intake plus the cookie-gated admin API.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::AuthConfig;
use crate::compose::ReplyComposer;
use crate::error::{StorageError, WorkerError};
use crate::events::EventLog;
use crate::outbox::Outbox;
use crate::queue::{Job, JobQueue};
use crate::settings::{Settings, SettingsStore};
use crate::worker::Worker;

/// Shared state across handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: JobQueue,
    pub settings: SettingsStore,
    pub composer: ReplyComposer,
    pub worker: Arc<Worker>,
    pub events: EventLog,
    pub outbox: Outbox,
    pub auth: AuthConfig,
}

/// Build the router: public intake/auth endpoints plus the gated admin API.
pub fn routes(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/settings", get(get_settings).post(save_settings))
        .route("/api/queue", get(queue_info))
        .route("/api/tester", post(tester_preview))
        .route("/api/worker/run", post(run_worker))
        .route("/api/logs", get(list_logs))
        .route("/api/outbox", get(list_outbox))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(health))
        .route("/intake", post(intake))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/me", get(me))
        .merge(admin)
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(1_000_000))
        .with_state(state)
}

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let cookie = request
        .headers()
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok());
    if state.auth.is_authed(cookie) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Unauthorized" })),
        )
            .into_response()
    }
}

fn storage_failure(e: StorageError) -> Response {
    tracing::error!(error = %e, "Storage failure serving request");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Storage unavailable" })),
    )
        .into_response()
}

// ── Public ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn intake(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    let job = Job::new(payload);
    state
        .events
        .emit(
            "intake.received",
            serde_json::json!({
                "id": job.id.as_str(),
                "from": non_empty_field(&job, "email"),
                "subject": non_empty_field(&job, "subject"),
            }),
        )
        .await;

    if let Err(e) = state.queue.enqueue(&job).await {
        return storage_failure(e);
    }
    state
        .events
        .emit("queue.enqueued", serde_json::json!({ "id": job.id.as_str() }))
        .await;

    info!(job = %job.id, "Intake queued");
    Json(serde_json::json!({ "queued": true, "id": job.id })).into_response()
}

fn non_empty_field(job: &Job, key: &str) -> serde_json::Value {
    match job.field(key) {
        "" => serde_json::Value::Null,
        value => serde_json::Value::String(value.to_string()),
    }
}

#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    password: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginBody>) -> Response {
    if state.auth.check_password(&body.password) {
        (
            StatusCode::OK,
            [(header::SET_COOKIE, state.auth.session_cookie())],
            Json(serde_json::json!({ "ok": true })),
        )
            .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid credentials" })),
        )
            .into_response()
    }
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, state.auth.clear_cookie())],
        Json(serde_json::json!({ "ok": true })),
    )
}

async fn me(State(state): State<AppState>, headers: axum::http::HeaderMap) -> impl IntoResponse {
    let cookie = headers.get(header::COOKIE).and_then(|value| value.to_str().ok());
    Json(serde_json::json!({ "authed": state.auth.is_authed(cookie) }))
}

// ── Admin ───────────────────────────────────────────────────────────

async fn get_settings(State(state): State<AppState>) -> Response {
    match state.settings.load().await {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn save_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Response {
    match state.settings.save(&settings).await {
        Ok(()) => Json(settings).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn queue_info(State(state): State<AppState>) -> Response {
    match state.queue.len().await {
        Ok(length) => Json(serde_json::json!({ "length": length })).into_response(),
        Err(e) => storage_failure(e),
    }
}

/// Preview the reply that would be composed for a form payload. No send.
async fn tester_preview(
    State(state): State<AppState>,
    Json(form): Json<serde_json::Value>,
) -> Response {
    let settings = match state.settings.load().await {
        Ok(settings) => settings,
        Err(e) => return storage_failure(e),
    };
    let preview = state.composer.build(&settings, &Job::new(form)).await;
    state
        .events
        .emit(
            "tester.preview",
            serde_json::json!({ "to": preview.to_email, "subject": preview.subject }),
        )
        .await;
    Json(preview).into_response()
}

async fn run_worker(State(state): State<AppState>) -> Response {
    state.events.emit("worker.run.request", serde_json::json!({})).await;
    match state.worker.run_once().await {
        Ok(summary) => {
            state
                .events
                .emit(
                    "worker.run.result",
                    serde_json::json!({ "processed": summary.processed, "remaining": summary.remaining }),
                )
                .await;
            Json(summary).into_response()
        }
        Err(WorkerError::Throttled { since_last }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "Worker recently ran",
                "sinceLastMs": since_last.as_millis() as u64,
            })),
        )
            .into_response(),
        Err(WorkerError::Storage(e)) => storage_failure(e),
    }
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: u64,
}

fn default_log_limit() -> u64 {
    200
}

async fn list_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    match state.events.recent(query.limit).await {
        Ok(logs) => Json(serde_json::json!({ "logs": logs })).into_response(),
        Err(e) => storage_failure(e),
    }
}

#[derive(Deserialize)]
struct OutboxQuery {
    #[serde(default)]
    offset: u64,
    #[serde(default = "default_outbox_limit")]
    limit: u64,
}

fn default_outbox_limit() -> u64 {
    20
}

async fn list_outbox(State(state): State<AppState>, Query(query): Query<OutboxQuery>) -> Response {
    match state.outbox.list(query.offset, query.limit).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => storage_failure(e),
    }
}
