//! Workflow status and cancellation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;
use vmscribe_core::{InstanceId, WorkflowResult};
use vmscribe_workflow::WorkflowOutcome;

use super::create_error_response;
use crate::AppState;

/// Runtime state reported for a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    /// Still running
    Pending,
    /// Finished with a result
    Completed,
    /// Cancelled before finishing
    Cancelled,
}

/// Status body for a workflow instance.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowStatusResponse {
    /// Instance identifier
    pub instance_id: String,
    /// Runtime state
    pub runtime_status: RuntimeStatus,
    /// Current step while pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
    /// Final result once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<WorkflowResult>,
}

impl WorkflowStatusResponse {
    fn new(instance_id: InstanceId, runtime_status: RuntimeStatus) -> Self {
        Self { instance_id: instance_id.to_string(), runtime_status, custom_status: None, output: None }
    }
}

/// Returns the state of a workflow instance.
///
/// - 200: Completed, with the result
/// - 202: Still running, with the current step
/// - 404: Unknown instance
/// - 409: Cancelled
#[instrument(name = "get_workflow", skip(app_state), fields(instance_id = %instance_id))]
pub async fn get_workflow(
    State(app_state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> Response {
    let instance_id = InstanceId::from(instance_id);

    let outcome = match app_state.engine.workflow_result(instance_id).await {
        Ok(Some(outcome)) => outcome,
        Ok(None) => return not_found(instance_id),
        Err(e) => {
            error!(error = %e, "failed to load workflow");
            return create_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                "failed to load workflow",
            );
        },
    };
    debug!(outcome = ?outcome, "workflow state loaded");

    match outcome {
        WorkflowOutcome::Pending { custom_status } => {
            let mut body = WorkflowStatusResponse::new(instance_id, RuntimeStatus::Pending);
            body.custom_status = Some(custom_status);
            (StatusCode::ACCEPTED, Json(body)).into_response()
        },
        WorkflowOutcome::Completed(result) => {
            let mut body = WorkflowStatusResponse::new(instance_id, RuntimeStatus::Completed);
            body.output = Some(result);
            (StatusCode::OK, Json(body)).into_response()
        },
        WorkflowOutcome::Cancelled => {
            let body = WorkflowStatusResponse::new(instance_id, RuntimeStatus::Cancelled);
            (StatusCode::CONFLICT, Json(body)).into_response()
        },
    }
}

/// Cancels a running workflow instance.
///
/// - 200: Instance cancelled
/// - 404: Unknown instance
/// - 409: Instance already finished
#[instrument(name = "cancel_workflow", skip(app_state), fields(instance_id = %instance_id))]
pub async fn cancel_workflow(
    State(app_state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> Response {
    let instance_id = InstanceId::from(instance_id);

    match app_state.engine.cancel(instance_id).await {
        Ok(true) => {
            info!("workflow cancelled");
            let body = WorkflowStatusResponse::new(instance_id, RuntimeStatus::Cancelled);
            (StatusCode::OK, Json(body)).into_response()
        },
        Ok(false) => match app_state.engine.workflow_result(instance_id).await {
            Ok(Some(_)) => create_error_response(
                StatusCode::CONFLICT,
                "WORKFLOW_FINISHED",
                format!("workflow {instance_id} is no longer running"),
            ),
            Ok(None) => not_found(instance_id),
            Err(e) => {
                error!(error = %e, "failed to load workflow");
                create_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "failed to load workflow",
                )
            },
        },
        Err(e) => {
            error!(error = %e, "failed to cancel workflow");
            create_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                "failed to cancel workflow",
            )
        },
    }
}

fn not_found(instance_id: InstanceId) -> Response {
    create_error_response(
        StatusCode::NOT_FOUND,
        "WORKFLOW_NOT_FOUND",
        format!("workflow {instance_id} not found"),
    )
}
