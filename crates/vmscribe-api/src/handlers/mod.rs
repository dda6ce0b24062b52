//! HTTP request handlers for the vmscribe API.
//!
//! Handlers are grouped by functionality:
//! - `webhook` - voicemail notification intake
//! - `workflows` - workflow status and cancellation
//! - `health` - database connectivity check
//!
//! Failures use the `{error: {code, message}}` body built by
//! [`create_error_response`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub mod health;
pub mod webhook;
pub mod workflows;

pub use health::health_check;
pub use webhook::receive_voicemail;
pub use workflows::{cancel_workflow, get_workflow};

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Builds a JSON error response.
pub fn create_error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail { code: code.to_string(), message: message.into() },
    };

    (status, Json(body)).into_response()
}
