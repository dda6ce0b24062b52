//! Voicemail notification intake.
//!
//! Answers the subscription handshake, checks the verification token and
//! schedules a workflow. The request is acknowledged with 202 before any
//! processing happens; callers follow `status_url` for the outcome.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use vmscribe_core::CorrelationId;

use super::create_error_response;
use crate::AppState;

/// Header carrying the subscription handshake token.
pub const VALIDATION_TOKEN_HEADER: &str = "validation-token";

/// Header carrying the shared secret on every notification.
pub const VERIFICATION_TOKEN_HEADER: &str = "verification-token";

/// Response for an accepted notification.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    /// Workflow instance handling the notification
    pub instance_id: String,
    /// Where to poll for the workflow result
    pub status_url: String,
}

#[derive(Deserialize)]
struct Envelope {
    uuid: Option<String>,
}

/// Receives a voicemail notification.
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 400: Body is not valid UTF-8
/// - 401: Missing or wrong verification token
/// - 500: Workflow could not be scheduled
#[instrument(
    name = "receive_voicemail",
    skip(app_state, headers, body),
    fields(content_length = body.len())
)]
pub async fn receive_voicemail(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(validation_token) = headers.get(VALIDATION_TOKEN_HEADER) {
        if body.iter().all(u8::is_ascii_whitespace) {
            info!("answering subscription validation request");
            return handshake_response(validation_token.clone());
        }
    }

    if !is_verified(&app_state.verification_token, &headers) {
        warn!("rejecting notification with missing or invalid verification token");
        return create_error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid verification token",
        );
    }

    let Ok(raw_body) = std::str::from_utf8(&body) else {
        warn!("rejecting notification with a body that is not valid UTF-8");
        return create_error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_ENCODING",
            "notification body must be UTF-8",
        );
    };
    let correlation_id = correlation_id_of(raw_body);

    match app_state.engine.start_workflow(&correlation_id, raw_body).await {
        Ok(instance_id) => {
            info!(
                correlation_id = %correlation_id,
                instance_id = %instance_id,
                "notification accepted"
            );

            let response = AcceptedResponse {
                instance_id: instance_id.to_string(),
                status_url: format!("/workflows/{instance_id}"),
            };
            (StatusCode::ACCEPTED, Json(response)).into_response()
        },
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "failed to schedule workflow");
            create_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SCHEDULING_FAILED",
                "failed to schedule workflow",
            )
        },
    }
}

fn handshake_response(token: HeaderValue) -> Response {
    let mut response = StatusCode::OK.into_response();
    response.headers_mut().insert(VALIDATION_TOKEN_HEADER, token);
    response
}

fn is_verified(expected: &str, headers: &HeaderMap) -> bool {
    if expected.is_empty() {
        return true;
    }

    headers
        .get(VERIFICATION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|provided| timing_safe_eq(provided, expected))
}

/// Compares without short-circuiting on the first differing byte.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let diff = a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Correlation id from the payload `uuid`, or a fresh one when absent.
fn correlation_id_of(raw_body: &str) -> CorrelationId {
    serde_json::from_str::<Envelope>(raw_body)
        .ok()
        .and_then(|envelope| envelope.uuid)
        .filter(|uuid| !uuid.trim().is_empty())
        .map_or_else(CorrelationId::generate, CorrelationId::new)
}
