//! Error types for habitgraph.

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
    // === Domain Errors ===
    #[error("Cannot follow yourself")]
    SelfFollow,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Already following or follow request pending")]
    AlreadyFollowing,

    #[error("No pending follow request")]
    NoPendingRequest,

    #[error("Not following")]
    NotFollowing,

    #[error("Daily follow limit reached ({limit})")]
    FollowRateLimited { limit: u64 },

    #[error("Following limit reached ({limit})")]
    FollowingLimitReached { limit: u64 },

    #[error("This account is private")]
    PrivateAccount,

    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // === Server Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::UserNotFound(_) | Self::NotFound(_) | Self::NoPendingRequest => {
                StatusCode::NOT_FOUND
            }
            Self::SelfFollow
            | Self::NotFollowing
            | Self::BadRequest(_)
            | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyFollowing | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::FollowRateLimited { .. } | Self::FollowingLimitReached { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::PrivateAccount | Self::Forbidden(_) => StatusCode::FORBIDDEN,

            // 5xx Server Errors
            Self::Database(_)
            | Self::Redis(_)
            | Self::Queue(_)
            | Self::Config(_)
            | Self::ExternalService(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the stable error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::SelfFollow => "SELF_FOLLOW",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::AlreadyFollowing => "ALREADY_FOLLOWING",
            Self::NoPendingRequest => "NO_PENDING_REQUEST",
            Self::NotFollowing => "NOT_FOLLOWING",
            Self::FollowRateLimited { .. } => "FOLLOW_RATE_LIMITED",
            Self::FollowingLimitReached { .. } => "FOLLOWING_LIMIT_REACHED",
            Self::PrivateAccount => "PRIVATE_ACCOUNT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
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

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
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

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("Serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_have_stable_codes() {
        assert_eq!(AppError::SelfFollow.error_code(), "SELF_FOLLOW");
        assert_eq!(AppError::AlreadyFollowing.error_code(), "ALREADY_FOLLOWING");
        assert_eq!(AppError::NoPendingRequest.error_code(), "NO_PENDING_REQUEST");
        assert_eq!(
            AppError::FollowRateLimited { limit: 10 }.error_code(),
            "FOLLOW_RATE_LIMITED"
        );
        assert_eq!(
            AppError::FollowingLimitReached { limit: 10 }.error_code(),
            "FOLLOWING_LIMIT_REACHED"
        );
        assert_eq!(AppError::PrivateAccount.error_code(), "PRIVATE_ACCOUNT");
    }

    #[test]
    fn test_domain_errors_are_client_errors() {
        assert!(!AppError::SelfFollow.is_server_error());
        assert!(!AppError::PrivateAccount.is_server_error());
        assert_eq!(
            AppError::FollowRateLimited { limit: 1 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert!(AppError::Database("boom".to_string()).is_server_error());
    }

    #[test]
    fn test_into_response_uses_status_code() {
        let response = AppError::AlreadyFollowing.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
