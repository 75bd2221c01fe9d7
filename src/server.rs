//! HTTP API server.
//!
//! The thin boundary in front of the pipeline: list and upload documents,
//! create report jobs, poll their status, and download rendered output.
//! Report creation returns as soon as the ledger row exists; generation
//! runs detached and callers poll `GET /reports`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/files/available` | List ingested-able files under the uploads root |
//! | `POST` | `/files/upload` | Upload a document (multipart) and ingest it |
//! | `GET`  | `/reports` | List all reports with status and scores |
//! | `POST` | `/reports/generate` | Create a report job (202, returns immediately) |
//! | `GET`  | `/reports/download/{id}` | Download the rendered output |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "prompt must not be empty" } }
//! ```
//!
//! Malformed requests are rejected synchronously before any job row is
//! created.

use axum::{
    extract::{Multipart, Path as AxumPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use walkdir::WalkDir;

use crate::briefing::Briefing;
use crate::config::Config;
use crate::ingest::{project_for, Ingestor};
use crate::ledger::Ledger;
use crate::models::Report;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    uploads_root: PathBuf,
    ledger: Arc<Ledger>,
    ingestor: Arc<Ingestor>,
    briefing: Arc<Briefing>,
}

/// Starts the API server. Binds to `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(
    config: &Config,
    ledger: Arc<Ledger>,
    ingestor: Arc<Ingestor>,
    briefing: Arc<Briefing>,
) -> anyhow::Result<()> {
    let state = AppState {
        uploads_root: config.storage.uploads_root.clone(),
        ledger,
        ingestor,
        briefing,
    };

    std::fs::create_dir_all(&state.uploads_root)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    println!("API server listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/files/available", get(handle_list_files))
        .route("/files/upload", post(handle_upload))
        .route("/reports", get(handle_list_reports))
        .route("/reports/generate", post(handle_create_report))
        .route("/reports/download/{id}", get(handle_download))
        .route("/health", get(handle_health))
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
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

// ============ GET /files/available ============

/// Relative paths of every file under the uploads root.
async fn handle_list_files(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(&state.uploads_root) {
        let entry = entry.map_err(|e| internal(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&state.uploads_root)
            .unwrap_or(entry.path());
        files.push(relative.to_string_lossy().to_string());
    }
    files.sort();
    Ok(Json(files))
}

// ============ POST /files/upload ============

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    project: String,
}

/// Save an uploaded document under the uploads root and ingest it
/// immediately. Ingestion failures are logged by the pipeline and do not
/// fail the upload.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut filename: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;
    let mut project: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(sanitize_component);
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| bad_request(e.to_string()))?
                        .to_vec(),
                );
            }
            Some("project") => {
                let value = field.text().await.map_err(|e| bad_request(e.to_string()))?;
                if !value.trim().is_empty() {
                    project = Some(sanitize_component(&value));
                }
            }
            _ => {}
        }
    }

    let filename = filename
        .filter(|n| !n.is_empty())
        .ok_or_else(|| bad_request("no file part"))?;
    let data = data.ok_or_else(|| bad_request("no file part"))?;

    let dir = match &project {
        Some(p) => state.uploads_root.join(p),
        None => state.uploads_root.clone(),
    };
    std::fs::create_dir_all(&dir).map_err(|e| internal(e.to_string()))?;

    let save_path = dir.join(&filename);
    std::fs::write(&save_path, &data).map_err(|e| internal(e.to_string()))?;

    let project = project.unwrap_or_else(|| project_for(&save_path));
    state.ingestor.index_file(&save_path, &project, false).await;

    Ok(Json(UploadResponse { filename, project }))
}

/// Keep only the final path component of client-supplied names so uploads
/// cannot escape the uploads root.
fn sanitize_component(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

// ============ POST /reports/generate ============

#[derive(Deserialize)]
struct CreateReportRequest {
    title: String,
    prompt: String,
    projects: Vec<String>,
}

/// Create a report job. Returns `202 Accepted` with the `generating` row;
/// generation runs detached.
async fn handle_create_report(
    State(state): State<AppState>,
    Json(req): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<Report>), AppError> {
    if req.title.trim().is_empty() {
        return Err(bad_request("title must not be empty"));
    }
    if req.prompt.trim().is_empty() {
        return Err(bad_request("prompt must not be empty"));
    }
    if req.projects.is_empty() || req.projects.iter().any(|p| p.trim().is_empty()) {
        return Err(bad_request("projects must be a non-empty list of names"));
    }

    let report = state
        .briefing
        .submit(&req.title, &req.prompt, &req.projects)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok((StatusCode::ACCEPTED, Json(report)))
}

// ============ GET /reports ============

async fn handle_list_reports(
    State(state): State<AppState>,
) -> Result<Json<Vec<Report>>, AppError> {
    let reports = state
        .ledger
        .list()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(reports))
}

// ============ GET /reports/download/{id} ============

async fn handle_download(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Response, AppError> {
    let path = state
        .ledger
        .download_path(&id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found("report not ready or not found"))?;

    let bytes =
        std::fs::read(&path).map_err(|_| not_found("report output is no longer available"))?;

    let headers = [
        (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.txt\"", id),
        ),
    ];

    Ok((headers, bytes).into_response())
}
