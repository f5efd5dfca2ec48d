//! Error types for the export pipeline and its HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::model::ApiResponse;

/// Failures of one pipeline run. Invalid records are not errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("product source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("failed to write {}: {source}", .path.display())]
    SinkWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export run timed out after {0:?}")]
    TimedOut(Duration),
}

impl ExportError {
    pub fn sink(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExportError::SinkWriteFailed {
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by HTTP handlers, rendered as the standard envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to generate CSV: {0}")]
    Export(#[from] ExportError),

    #[error("Failed to list files: {0}")]
    Files(std::io::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Export(e) => {
                tracing::error!(?e, "export failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Files(e) => {
                tracing::error!(?e, "listing output files failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = Json(ApiResponse::<()>::err(self.to_string()));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_error_mentions_path() {
        let err = ExportError::sink(
            "/tmp/out/valid.csv",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/out/valid.csv"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn status_codes() {
        let resp = ApiError::NotFound("Product not found".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ApiError::from(ExportError::SourceUnavailable("down".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = ApiError::BadRequest("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
