//! HTTP boundary for image ingestion.
//!
//! Receives multipart requests from the catalog admin UI, hands them to the
//! [`ImageIngestor`], and returns the merged image list. In local mode the
//! upload directory is also served statically under `local.public_prefix`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/{collection}/{id}/images` | Ingest images for a new entity |
//! | `PUT`  | `/api/{collection}/{id}/images` | Ingest images for an existing entity |
//! | `GET`  | `/health` | Health check (returns version and store) |
//! | `GET`  | `{public_prefix}/{name}` | Stored file (local mode only) |
//!
//! The ingest body is `multipart/form-data` with an optional text part
//! `existingImages` (JSON array of strings) and zero or more file parts named
//! `images`. The response is:
//!
//! ```json
//! { "images": ["https://cdn/a.jpg", "/uploads/1b2c..._shoe.jpg"], "failed": [] }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "existing images must be a JSON array of strings: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404, unknown collection),
//! `payload_too_large` (413, over `server.max_body_bytes`),
//! `storage_unavailable` (503), `internal` (500).

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::config::{Config, StoreMode};
use crate::error::PipelineError;
use crate::ingest::ImageIngestor;
use crate::keepalive;
use crate::models::{IngestionResult, UploadItem};

/// Multipart field carrying the JSON list of references to keep.
pub const EXISTING_FIELD: &str = "existingImages";
/// Multipart field carrying each new image binary.
pub const IMAGES_FIELD: &str = "images";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    ingestor: ImageIngestor,
}

/// Starts the ingestion server with the store selected by the configuration.
///
/// Binds to `[server].bind` and runs until Ctrl-C, then waits for any
/// background optimizations before returning.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ingestor = ImageIngestor::from_config(config)?;
    run_server_with_ingestor(config, ingestor).await
}

/// Like [`run_server`], with a caller-supplied [`ImageIngestor`].
///
/// # Example
///
/// ```rust,no_run
/// use catalog_images::ingest::ImageIngestor;
/// use catalog_images::server::run_server_with_ingestor;
/// use catalog_images::store_local::LocalStore;
/// use std::sync::Arc;
///
/// # async fn example(config: &catalog_images::config::Config) -> anyhow::Result<()> {
/// let store = LocalStore::init(&config.local)?;
/// run_server_with_ingestor(config, ImageIngestor::new(Arc::new(store))).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_ingestor(
    config: &Config,
    ingestor: ImageIngestor,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(config, ingestor.clone());

    let keepalive = keepalive::spawn(&config.keepalive);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        addr = %bind_addr,
        store = ingestor.store_name(),
        "Image ingestion server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = keepalive {
        handle.abort();
    }
    ingestor.drain().await;
    info!("Server stopped");

    Ok(())
}

/// Build the router. Exposed so callers can mount it inside a larger app.
pub fn router(config: &Config, ingestor: ImageIngestor) -> Router {
    let state = AppState {
        config: Arc::new(config.clone()),
        ingestor,
    };

    let mut app = Router::new()
        .route(
            "/api/{collection}/{id}/images",
            post(handle_ingest).put(handle_ingest),
        )
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .with_state(state);

    if config.store.mode == StoreMode::Local {
        let prefix = config.local.public_prefix_trimmed();
        debug!(prefix, dir = %config.local.upload_dir.display(), "Serving uploads");
        app = app.nest_service(prefix, ServeDir::new(&config.local.upload_dir));
    }

    app
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
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

/// Internal error type that converts into an Axum HTTP response.
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

fn storage_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "storage_unavailable".to_string(),
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

fn multipart_error(context: &str, err: MultipartError) -> AppError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError {
            status,
            code: "payload_too_large".to_string(),
            message: format!("{}: {}", context, err.body_text()),
        }
    } else {
        bad_request(format!("{}: {}", context, err.body_text()))
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::ClientInput(msg) => bad_request(msg),
            PipelineError::StorageUnavailable(msg) => storage_unavailable(msg),
            PipelineError::Io(e) => internal(e.to_string()),
        }
    }
}

// ============ /api/{collection}/{id}/images ============

async fn handle_ingest(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Json<IngestionResult>, AppError> {
    if !state.config.accepts_collection(&collection) {
        return Err(not_found(format!("unknown collection: {}", collection)));
    }

    let mut existing: Option<String> = None;
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("invalid multipart body", e))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(EXISTING_FIELD) => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(EXISTING_FIELD, e))?;
                existing = Some(text);
            }
            Some(IMAGES_FIELD) => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(IMAGES_FIELD, e))?;
                uploads.push(UploadItem {
                    filename,
                    content_type,
                    bytes,
                });
            }
            other => debug!(field = ?other, "Ignoring unknown multipart field"),
        }
    }

    info!(
        collection = %collection,
        id = %id,
        uploads = uploads.len(),
        "Ingest request"
    );

    let result = state
        .ingestor
        .ingest(existing.as_deref(), uploads, &collection)
        .await
        .map_err(|e| {
            warn!(collection = %collection, id = %id, error = %e, "Ingest request rejected");
            AppError::from(e)
        })?;

    Ok(Json(result))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    store: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: state.ingestor.store_name().to_string(),
    })
}
