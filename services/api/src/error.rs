//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how each
//! error is rendered as an HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use receipt_pipeline_core::{PipelineError, PortError};
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A failure reported by the receipt pipeline.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error while running embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed request that never reached the pipeline.
    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

fn body(status: StatusCode, code: &str, message: String) -> Response {
    (status, Json(json!({ "error": code, "message": message }))).into_response()
}

fn pipeline_response(err: PipelineError) -> Response {
    let code = err.kind().as_str();
    match err {
        PipelineError::Validation(_) => body(StatusCode::BAD_REQUEST, code, err.to_string()),
        PipelineError::NotFound { .. } => body(StatusCode::NOT_FOUND, code, err.to_string()),
        PipelineError::NoData(_) => body(StatusCode::NOT_FOUND, code, err.to_string()),
        PipelineError::Conflict(_) => body(StatusCode::CONFLICT, code, err.to_string()),
        PipelineError::Unauthenticated => body(StatusCode::UNAUTHORIZED, code, err.to_string()),
        PipelineError::UnlinkedAccount => body(StatusCode::UNAUTHORIZED, code, err.to_string()),
        PipelineError::Cancelled => body(StatusCode::SERVICE_UNAVAILABLE, code, err.to_string()),
        PipelineError::PartialExport {
            ref spreadsheet_id,
            ref spreadsheet_url,
            step,
            ..
        } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": code,
                "message": err.to_string(),
                "spreadsheetId": spreadsheet_id,
                "spreadsheetUrl": spreadsheet_url,
                "failedStep": step.as_str(),
            })),
        )
            .into_response(),
        PipelineError::External {
            step,
            retryable,
            timed_out,
            ..
        } => {
            error!(step = step.as_str(), error = %err, "External call failed");
            let status = if timed_out {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                status,
                Json(json!({
                    "error": code,
                    "message": err.to_string(),
                    "failedStep": step.as_str(),
                    "retryable": retryable,
                })),
            )
                .into_response()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Pipeline(err) => pipeline_response(err),
            ApiError::BadRequest(message) => body(StatusCode::BAD_REQUEST, "validation", message),
            ApiError::Unauthorized => body(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Authentication required".to_string(),
            ),
            ApiError::Forbidden(message) => body(StatusCode::FORBIDDEN, "forbidden", message),
            ApiError::Port(PortError::NotFound(message)) => {
                body(StatusCode::NOT_FOUND, "not_found", message)
            }
            other => {
                error!(error = %other, "Request failed");
                body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "An internal error occurred".to_string(),
                )
            }
        }
    }
}
