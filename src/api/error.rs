//! Error responses of the REST surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::invocation_log::LogStoreError;

/// A failed request, rendered as `{"error": "<message>"}`.
#[derive(Debug)]
pub enum ApiError {
    /// Unknown server name.
    NotFound(String),
    /// The backend server could not satisfy the request.
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    pub fn server_not_found(name: &str) -> Self {
        ApiError::NotFound(format!("Server '{name}' not found"))
    }
}

impl From<LogStoreError> for ApiError {
    fn from(e: LogStoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
