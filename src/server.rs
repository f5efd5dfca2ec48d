//! HTTP surface of the feed server.
//!
//! Routes:
//! - `POST /api/webhook/product-added`: enqueue an export job and return its queue position.
//! - `GET /api/status`: queue length, processing flag and server time.
//! - `GET /api/generate-csv`: run the export once and return the counts and invalid products.
//! - `GET /api/required-fields`: the configured required field names.
//! - `GET /api/files`: generated files in the output directory.
//! - `/output/*`: the generated files themselves.
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::error::ApiError;
use crate::model::{
    ApiResponse, CsvResponse, FileDetails, FilesResponse, RequiredFieldsResponse, StatusSnapshot,
    WebhookResponse,
};
use crate::processor::Processor;

const DEFAULT_TRIGGER: &str = "webhook";

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<Processor>,
    /// URL prefix the output directory is mounted under, e.g. `/output`.
    pub public_path: String,
}

impl AppState {
    pub fn new(processor: Arc<Processor>, public_path: impl Into<String>) -> Self {
        Self {
            processor,
            public_path: public_path.into(),
        }
    }

    fn public_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.public_path.trim_end_matches('/'), file_name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub triggered_by: Option<String>,
    pub product_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let output_dir = state.processor.exporter().output_dir().to_path_buf();
    let mount = state.public_path.trim_end_matches('/').to_string();
    Router::new()
        .route("/api/webhook/product-added", post(product_added))
        .route("/api/status", get(status))
        .route("/api/generate-csv", get(generate_csv))
        .route("/api/required-fields", get(required_fields))
        .route("/api/files", get(list_files))
        .nest_service(&mount, ServeDir::new(output_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Accepts an empty body as well as `{triggeredBy?, productId?}`.
#[instrument(skip_all)]
async fn product_added(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookResponse>>, ApiError> {
    let request: WebhookRequest = if body.iter().all(u8::is_ascii_whitespace) {
        WebhookRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid webhook body: {e}")))?
    };
    let triggered_by = request
        .triggered_by
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TRIGGER.to_string());

    let queue_position = state.processor.submit(triggered_by, request.product_id);
    Ok(Json(ApiResponse::ok(WebhookResponse {
        message: "Added to processing queue".into(),
        queue_position,
    })))
}

async fn status(State(state): State<AppState>) -> Json<ApiResponse<StatusSnapshot>> {
    Json(ApiResponse::ok(state.processor.status()))
}

#[instrument(skip_all)]
async fn generate_csv(State(state): State<AppState>) -> Result<Json<ApiResponse<CsvResponse>>, ApiError> {
    let result = state.processor.run_now().await?;
    let exporter = state.processor.exporter();
    Ok(Json(ApiResponse::ok(CsvResponse {
        valid_products_count: result.valid_count(),
        invalid_products_count: result.invalid_count(),
        valid_csv_url: state.public_url(exporter.valid_file()),
        invalid_csv_url: state.public_url(exporter.invalid_file()),
        invalid_products: result.invalid_records,
    })))
}

async fn required_fields(State(state): State<AppState>) -> Json<ApiResponse<RequiredFieldsResponse>> {
    Json(ApiResponse::ok(RequiredFieldsResponse {
        required_fields: state.processor.exporter().required_fields().to_vec(),
    }))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<ApiResponse<FilesResponse>>, ApiError> {
    let dir = state.processor.exporter().output_dir();
    let files = read_output_dir(dir, |name| state.public_url(name))
        .await
        .map_err(ApiError::Files)?;
    Ok(Json(ApiResponse::ok(FilesResponse { files })))
}

/// Published files only: staged `.tmp` files and subdirectories are skipped.
/// A missing directory lists as empty.
async fn read_output_dir(
    dir: &Path,
    url_for: impl Fn(&str) -> String,
) -> std::io::Result<Vec<FileDetails>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !meta.is_file() || name.ends_with(".tmp") {
            continue;
        }
        files.push(FileDetails {
            url: url_for(&name),
            size: meta.len(),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            name,
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
