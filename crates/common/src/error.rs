//! Error types for polly.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // === Voting Policy Errors ===
    #[error("Cannot vote on an inactive poll")]
    PollInactive,

    #[error("Poll has expired")]
    PollExpired,

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Multiple votes not allowed on this poll")]
    MultipleVotesNotAllowed,

    #[error("Maximum votes per user reached ({limit})")]
    MaxVotesReached { limit: u32 },

    // === Server Errors ===
    /// A concurrent write touched the same rows. Raised by the store, retried by the caller.
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_)
            | Self::PollInactive
            | Self::PollExpired
            | Self::InvalidOptions(_)
            | Self::MultipleVotesNotAllowed
            | Self::MaxVotesReached { .. } => StatusCode::BAD_REQUEST,

            // 5xx Server Errors
            Self::Conflict(_) | Self::Database(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::PollInactive => "POLL_INACTIVE",
            Self::PollExpired => "POLL_EXPIRED",
            Self::InvalidOptions(_) => "INVALID_OPTIONS",
            Self::MultipleVotesNotAllowed => "MULTIPLE_VOTES_NOT_ALLOWED",
            Self::MaxVotesReached { .. } => "MAX_VOTES_REACHED",
            Self::Conflict(_) | Self::Database(_) | Self::Config(_) | Self::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Returns whether the failed operation may succeed if run again unchanged.
    #[must_use]
    pub const fn is_write_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = code, "Client error occurred");
        }

        // Storage details stay in the logs.
        let message = if self.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
