//! HTTP API for the presentation layer.
//!
//! A browser extension (or any other front end) renders the PMS badge,
//! the "Has PMS" / "No PMS" / "Auto" buttons and the detection comment;
//! everything behind those controls is served from here.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/jobs/{id}/status` | Current status; `?refresh=true` re-reads the remote |
//! | `PUT`    | `/jobs/{id}/status` | `{ "has_pms": bool, "is_override": bool }` |
//! | `POST`   | `/jobs/{id}/detect` | `{ "lines": [..], "comment": "..", "explicit": bool }` |
//! | `GET`    | `/jobs/{id}/images` | Image attachments |
//! | `PUT`    | `/jobs/{id}/images` | `{ "images": [..] }` |
//! | `POST`   | `/classify` | Classify job text without touching any state |
//! | `DELETE` | `/cache` | Clear the local cache |
//!
//! `{id}` is either a bare job id or a URL-encoded job page URL carrying
//! `ID=<digits>`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "job id must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so that an extension
//! content script can call the API from the job system's origin.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use jobsight_core::classifier::{Detection, JobText};
use jobsight_core::models::{EntityIdError, JobImage};

use crate::config::Config;
use crate::service::{DetectionOutcome, StatusService, StatusView, UpdateOutcome};

#[derive(Clone)]
struct AppState {
    service: Arc<StatusService>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(StatusService::open(config).await?);
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "jobsight API listening");
    println!("jobsight API listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the API router around an existing service.
pub fn router(service: Arc<StatusService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/jobs/{id}/status",
            get(handle_get_status).put(handle_set_status),
        )
        .route("/jobs/{id}/detect", post(handle_detect))
        .route(
            "/jobs/{id}/images",
            get(handle_get_images).put(handle_set_images),
        )
        .route("/classify", post(handle_classify))
        .route("/cache", delete(handle_clear_cache))
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Invalid job ids are the caller's fault; anything else is ours.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(id_err) = err.downcast_ref::<EntityIdError>() {
            return bad_request(id_err.to_string());
        }
        tracing::error!(error = %format!("{:#}", err), "request failed");
        internal(format!("{:#}", err))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /jobs/{id}/status ============

#[derive(Deserialize, Default)]
struct StatusQuery {
    #[serde(default)]
    refresh: bool,
}

async fn handle_get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusView>, AppError> {
    let view = if query.refresh {
        state.service.refresh_status(&id).await?
    } else {
        state.service.get_status(&id).await?
    };
    Ok(Json(view))
}

#[derive(Deserialize)]
struct SetStatusRequest {
    has_pms: bool,
    /// Manual marks are overrides unless the caller says otherwise.
    #[serde(default = "default_true")]
    is_override: bool,
}

fn default_true() -> bool {
    true
}

async fn handle_set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<UpdateOutcome>, AppError> {
    let outcome = state
        .service
        .set_status(&id, req.has_pms, req.is_override)
        .await?;
    Ok(Json(outcome))
}

// ============ POST /jobs/{id}/detect ============

#[derive(Deserialize)]
struct DetectRequest {
    #[serde(flatten)]
    job: JobText,
    /// `true` for the "Auto" button; replaces a user override.
    #[serde(default)]
    explicit: bool,
}

async fn handle_detect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DetectRequest>,
) -> Result<Json<DetectionOutcome>, AppError> {
    let outcome = if req.explicit {
        state.service.auto_detect(&id, &req.job).await?
    } else {
        state.service.scan(&id, &req.job).await?
    };
    Ok(Json(outcome))
}

// ============ /jobs/{id}/images ============

#[derive(Serialize, Deserialize)]
struct ImagesBody {
    images: Vec<JobImage>,
}

async fn handle_get_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ImagesBody>, AppError> {
    let images = state
        .service
        .get_images(&id)
        .await?
        .ok_or_else(|| not_found(format!("no images recorded for job {}", id)))?;
    Ok(Json(ImagesBody { images }))
}

async fn handle_set_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ImagesBody>,
) -> Result<Json<UpdateOutcome>, AppError> {
    Ok(Json(state.service.set_images(&id, body.images).await?))
}

// ============ POST /classify ============

#[derive(Serialize)]
struct ClassifyResponse {
    #[serde(flatten)]
    detection: Detection,
    comment: String,
}

async fn handle_classify(
    State(state): State<AppState>,
    Json(job): Json<JobText>,
) -> Result<Json<ClassifyResponse>, AppError> {
    let detection = state.service.classifier().detect(&job);
    let comment = detection.comment();
    Ok(Json(ClassifyResponse { detection, comment }))
}

// ============ DELETE /cache ============

#[derive(Serialize)]
struct ClearResponse {
    removed: usize,
}

async fn handle_clear_cache(
    State(state): State<AppState>,
) -> Result<Json<ClearResponse>, AppError> {
    let removed = state.service.clear_local_cache().await?;
    Ok(Json(ClearResponse { removed }))
}
