//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sudosos_auth::QrError;
use thiserror::Error;

/// Errors surfaced by the HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Gone(_) => (StatusCode::GONE, "Gone"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.parts();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }

        let message = match self {
            ApiError::Unauthorized(m)
            | ApiError::NotFound(m)
            | ApiError::Gone(m)
            | ApiError::BadRequest(m)
            | ApiError::Internal(m) => m,
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

impl From<QrError> for ApiError {
    fn from(err: QrError) -> Self {
        match err {
            QrError::NotFound => ApiError::NotFound(err.to_string()),
            QrError::Expired => ApiError::Gone(err.to_string()),
            QrError::InvalidState(_) => ApiError::BadRequest(err.to_string()),
            QrError::Storage(_) | QrError::Credential(_) => ApiError::Internal(err.to_string()),
        }
    }
}
