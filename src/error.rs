use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Missing capability: {0}")]
    Forbidden(String),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn not_found(what: &str, id: &str) -> Self {
        ApiError::NotFound(format!("{what} '{id}'"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) | ApiError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database { .. }
            | ApiError::Toml(_)
            | ApiError::Io(_)
            | ApiError::Config(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Constraint violations are the caller's fault; everything else from libSQL is ours.
impl From<libsql::Error> for ApiError {
    fn from(err: libsql::Error) -> Self {
        let message = err.to_string();
        if message.contains("FOREIGN KEY constraint failed") {
            ApiError::Conflict("record is referenced by or references a missing record".to_string())
        } else if message.contains("UNIQUE constraint failed") {
            let column = message
                .rsplit("UNIQUE constraint failed:")
                .next()
                .map(str::trim)
                .unwrap_or_default();
            ApiError::Conflict(format!("duplicate value for {column}"))
        } else {
            ApiError::Database { message }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation(errors) => json!({
                "status": "error",
                "message": self.to_string(),
                "errors": errors,
            }),
            _ if status.is_server_error() => {
                error!("Request failed: {}", self);
                json!({ "status": "error", "message": "Internal server error" })
            }
            _ => json!({ "status": "error", "message": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
