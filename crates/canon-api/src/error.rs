//! API error types and JSON error response formatting.
//!
//! Failures before the first streamed byte map to an HTTP status with a
//! `{"error": ...}` body. Once streaming has begun this type is out of the
//! picture; failures travel in-band as `error` events.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use canon_core::error::CanonError;

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid input.
    BadRequest(String),
    /// 404 Not Found - unknown client slug.
    NotFound(String),
    /// 500 Internal Server Error - any other pre-stream fatal failure.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<CanonError> for ApiError {
    fn from(err: CanonError) -> Self {
        match &err {
            CanonError::Validation(msg) => ApiError::BadRequest(msg.clone()),
            CanonError::ClientNotFound(slug) => {
                ApiError::NotFound(format!("Client not found: {}", slug))
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
