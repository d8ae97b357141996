//! HTTP server.
//!
//! Exposes the pipeline via a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/rag/ingest` | Ingest new PDFs from the data directory |
//! | `POST` | `/rag/query` | Answer a question against the index |
//! | `GET`  | `/images/{file}` | Rendered page images (static files) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Error responses use a uniform envelope:
//!
//! ```json
//! { "error": { "code": "ingest_error", "message": "..." } }
//! ```
//!
//! Only ingestion can fail at the HTTP level. The query endpoint always
//! returns 200: guardrail refusals and internal failures are encoded in the
//! response body, with confidence 0 and no sources for the latter.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Config;
use crate::pipeline::Pipeline;

/// Shared application state passed to all route handlers via Axum's `State`
/// extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves the
/// pipeline until the process is terminated.
pub async fn run_server(config: &Config, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let image_dir = config.ingest.image_dir.clone();

    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/rag/ingest", post(handle_ingest))
        .route("/rag/query", post(handle_query))
        .route("/health", get(handle_health))
        .nest_service("/images", ServeDir::new(image_dir))
        .layer(cors)
        .with_state(state);

    info!("server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
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

fn ingest_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "ingest_error".to_string(),
        message: message.into(),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct IngestResponse {
    message: String,
}

/// `POST /rag/ingest` — ingest new PDFs from the data directory.
async fn handle_ingest(State(state): State<AppState>) -> Result<Json<IngestResponse>, AppError> {
    let summary = state
        .pipeline
        .ingest()
        .await
        .map_err(|e| ingest_error(e.to_string()))?;

    info!(
        found = summary.files_found,
        ingested = summary.files_ingested,
        skipped = summary.files_skipped,
        failed = summary.files_failed,
        nodes = summary.nodes_added,
        "ingestion finished"
    );

    Ok(Json(IngestResponse {
        message: "Data ingestion completed successfully.".to_string(),
    }))
}

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
    confidence: f64,
    metadata: QueryResponseMetadata,
}

#[derive(Serialize)]
struct QueryResponseMetadata {
    source_files: Vec<String>,
}

/// `POST /rag/query` — answer a question. Always 200: refusals and internal
/// failures come back in the body.
async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResponse> {
    let answer = state.pipeline.query(&request.question).await;

    Json(QueryResponse {
        response: answer.response,
        confidence: answer.confidence,
        metadata: QueryResponseMetadata {
            source_files: answer.source_files,
        },
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// `GET /health` — liveness check.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
