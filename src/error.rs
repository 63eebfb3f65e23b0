use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration not found: {0}")]
    ConfigurationNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("No upgrade path from {from_version} to {to_version}")]
    NoUpgradePath {
        from_version: String,
        to_version: String,
    },

    #[error("Ambiguous upgrade path at version {0}")]
    AmbiguousPath(String),

    #[error("Checksum mismatch for configuration {0}")]
    IntegrityViolation(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid execution state: {0}")]
    InvalidState(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::ConfigurationNotFound(version) => (
                StatusCode::NOT_FOUND,
                format!("Configuration '{}' not found", version),
            ),
            AppError::ExecutionNotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Execution '{}' not found", id),
            ),
            AppError::NoUpgradePath {
                from_version,
                to_version,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("No upgrade path from '{}' to '{}'", from_version, to_version),
            ),
            AppError::AmbiguousPath(version) => (
                StatusCode::CONFLICT,
                format!("Ambiguous upgrade path at version '{}'", version),
            ),
            AppError::IntegrityViolation(version) => (
                StatusCode::CONFLICT,
                format!("Checksum mismatch for configuration '{}'", version),
            ),
            AppError::InvalidVersion(version) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid version: {}", version),
            ),
            AppError::InvalidState(e) => (StatusCode::CONFLICT, e),
            AppError::Execution(e) => (StatusCode::BAD_REQUEST, e),
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
