// Response types for API endpoints.

use crate::core::errors::ShieldError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Error response structure: `{error, kind}` per the wire contract.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// API error type that converts domain errors to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub kind: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &str, message: String) -> Self {
        Self {
            status,
            message,
            kind: kind.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            kind: self.kind,
        });
        (self.status, body).into_response()
    }
}

impl From<ShieldError> for ApiError {
    fn from(err: ShieldError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError {
            status,
            message: err.user_message(),
            kind: err.kind().to_string(),
        }
    }
}
