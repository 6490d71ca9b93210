//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/analyze` | Start an analysis job, returns the repository id |
//! | `GET`  | `/results/{repo_id}` | Current job snapshot (partial while processing) |
//! | `GET`  | `/status` | Health check (returns version) |
//! | `POST` | `/query` | Ask a free-form question about an indexed repository |
//! | `POST` | `/push` | Commit a single file to a remote branch |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no analysis found for 'foo'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `llm_error` (502),
//! `internal` (500).
//!
//! All origins, methods, and headers are permitted so the browser front end
//! can be served from anywhere.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, PushConfig};
use crate::git;
use crate::models::{
    AnalyzeRequest, AnalyzeResponse, Job, PushRequest, PushResponse, QueryRequest, QueryResponse,
};
use crate::orchestrator::Orchestrator;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    push: Arc<PushConfig>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, push: PushConfig) -> Self {
        Self {
            orchestrator,
            push: Arc::new(push),
        }
    }
}

/// Build the router with all routes and CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/results/{repo_id}", get(handle_results))
        .route("/status", get(handle_status))
        .route("/query", post(handle_query))
        .route("/push", post(handle_push))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on an already-bound listener until the process exits.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Wire the production components from `config` and serve on
/// `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let state = AppState::new(orchestrator, config.push.clone());

    let listener = TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "git-sense listening");
    serve(listener, state).await
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn llm_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "llm_error",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ POST /analyze ============

async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let url = req.repo_url.trim();
    if url.is_empty() {
        return Err(bad_request("repo_url must not be empty"));
    }
    let branch = req.branch.filter(|b| !b.trim().is_empty());

    let repo_id = state
        .orchestrator
        .submit(url, branch)
        .map_err(|e| bad_request(e.to_string()))?;

    Ok(Json(AnalyzeResponse {
        message: "Analysis started".to_string(),
        repo_id,
    }))
}

// ============ GET /results/{repo_id} ============

async fn handle_results(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> Result<Json<Job>, AppError> {
    state
        .orchestrator
        .store()
        .get(&repo_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("no analysis found for '{}'", repo_id)))
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let question = req.query.trim();
    if question.is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let analyses = state.orchestrator.analyses();
    if !analyses.is_indexed(&req.repo_id) {
        return Err(not_found(format!(
            "repository '{}' is not indexed; run /analyze first",
            req.repo_id
        )));
    }

    let answer = analyses
        .ask(&req.repo_id, question)
        .await
        .map_err(|e| llm_error(format!("{:#}", e)))?;

    Ok(Json(QueryResponse {
        repo_id: req.repo_id,
        answer,
    }))
}

// ============ POST /push ============

async fn handle_push(
    State(state): State<AppState>,
    Json(req): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    if req.repo_url.trim().is_empty() {
        return Err(bad_request("repo_url must not be empty"));
    }

    let author = state.push.clone();
    let result = tokio::task::spawn_blocking(move || {
        git::push_file(
            req.repo_url.trim(),
            &req.file_path,
            &req.content,
            &req.commit_message,
            &req.branch,
            &author,
        )
    })
    .await
    .map_err(|e| internal(format!("push worker failed: {}", e)))?;

    let response = result.unwrap_or_else(|e| {
        tracing::warn!(error = %format!("{:#}", e), "push failed");
        PushResponse {
            success: false,
            message: format!("{:#}", e),
        }
    });
    Ok(Json(response))
}
