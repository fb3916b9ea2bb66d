//! HTTP Server for the quizstats API.
//!
//! Provides REST endpoints for uploading quiz exports and receiving the report.
//!
//! # API Endpoints
//!
//! | Method | Path              | Description                          |
//! |--------|-------------------|--------------------------------------|
//! | GET    | `/health`         | Health check                         |
//! | POST   | `/api/upload`     | Upload one or more CSV exports       |
//! | GET    | `/api/logs`       | SSE stream for real-time logs        |

use axum::{
    extract::{Multipart, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_error, log_info, LOG_BROADCASTER};
use super::types::{error_response, UploadResponse};
use crate::config::PipelineOptions;
use crate::error::{PipelineError, ServerError, ServerResult};
use crate::transform::pipeline::run_uploads;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub options: Arc<PipelineOptions>,
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Pipeline(PipelineError::Transform(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Pipeline(PipelineError::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Pipeline(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        log_error(self.to_string());
        (self.status_code(), Json(error_response(&self.to_string()))).into_response()
    }
}

pub fn router(options: PipelineOptions) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    let state = AppState {
        options: Arc::new(options),
    };

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/upload", post(upload_csv))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(port: u16, options: PipelineOptions) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(options);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    eprintln!("🚀 quizstats server running on http://localhost:{}", port);
    eprintln!("   POST /api/upload - Upload CSV exports (multipart, field 'file')");
    eprintln!("   GET  /api/logs   - SSE log stream");
    eprintln!("   GET  /health     - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "quizstats",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "upload": "POST /api/upload",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    // Lagged receivers drop the missed entries and keep streaming.
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let entry = result.ok()?;
        let json = serde_json::to_string(&entry).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Upload endpoint: every `file` part is one source.
async fn upload_csv(State(state): State<AppState>, mut multipart: Multipart) -> ServerResult<Json<UploadResponse>> {
    let mut uploads: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("upload-{}.csv", uploads.len() + 1));
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
        uploads.push((name, bytes.to_vec()));
    }

    if uploads.is_empty() {
        return Err(ServerError::BadRequest("No file provided".to_string()));
    }

    log_info(format!(
        "📄 New upload: {} file(s), {} bytes",
        uploads.len(),
        uploads.iter().map(|(_, b)| b.len()).sum::<usize>()
    ));

    let options = Arc::clone(&state.options);
    let output = tokio::task::spawn_blocking(move || run_uploads(uploads, &options))
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))??;

    Ok(Json(UploadResponse::from(output)))
}
