//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleetsim_manager::ManagerError;
use serde::Serialize;
use thiserror::Error;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Busy(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "validation", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            ApiError::Busy(msg) => (StatusCode::CONFLICT, "busy", msg.clone()),
            ApiError::Unavailable(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "unavailable", msg.clone())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg.clone()),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ManagerError> for ApiError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::Validation(msg) => ApiError::BadRequest(msg),
            ManagerError::NotFound(msg) => ApiError::NotFound(msg),
            ManagerError::AlreadyExists(msg) | ManagerError::Conflict(msg) => {
                ApiError::Conflict(msg)
            }
            ManagerError::Busy(msg) => ApiError::Busy(msg),
            ManagerError::Unavailable(msg) => ApiError::Unavailable(msg),
            ManagerError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let cases = [
            (
                ApiError::from(ManagerError::Validation("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(ManagerError::NotFound("missing".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(ManagerError::AlreadyExists("dup".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(ManagerError::Busy("busy".into())),
                StatusCode::CONFLICT,
            ),
        ];
        for (error, expected) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
