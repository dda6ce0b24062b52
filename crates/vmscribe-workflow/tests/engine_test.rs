//! Integration tests for the workflow engine lifecycle.
//!
//! Covers scheduling, idempotent starts, cancellation, panics inside a run,
//! graceful shutdown and recovery of unfinished instances.

mod common;

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use anyhow::Result;
use common::{polled_message, voicemail_body, Harness};
use vmscribe_core::{
    models::{
        AccountScope, InstanceStatus, Message, TranscriptionStatus, WorkflowInstance,
        WorkflowResult,
    },
    Clock, CorrelationId, InstanceId,
};
use vmscribe_workflow::{
    gateway::{
        mock::{ScriptedMessageGateway, StaticTranscriptionGateway},
        MessageGateway,
    },
    WorkflowEngine, WorkflowOutcome,
};

/// Message gateway whose fetches never complete.
struct HangingMessageGateway;

impl MessageGateway for HangingMessageGateway {
    fn fetch_message(
        &self,
        _scope: AccountScope,
        _message_id: i64,
    ) -> Pin<Box<dyn Future<Output = vmscribe_workflow::Result<Message>> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

fn engine(harness: &Harness) -> WorkflowEngine {
    WorkflowEngine::new(harness.workflow_store(), harness.workflow.clone(), harness.clock())
}

fn hanging_engine(harness: &Harness) -> WorkflowEngine {
    WorkflowEngine::new(
        harness.workflow_store(),
        harness.workflow_with_messages(Arc::new(HangingMessageGateway)),
        harness.clock(),
    )
}

async fn outcome(engine: &WorkflowEngine, id: InstanceId) -> Result<WorkflowOutcome> {
    Ok(engine.workflow_result(id).await?.expect("instance should exist"))
}

/// Polls until the instance reports a custom status starting with `prefix`.
async fn wait_for_status(engine: &WorkflowEngine, id: InstanceId, prefix: &str) -> Result<String> {
    let status = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match engine.workflow_result(id).await {
                Ok(Some(WorkflowOutcome::Pending { custom_status }))
                    if custom_status.starts_with(prefix) =>
                {
                    return custom_status;
                },
                _ => tokio::task::yield_now().await,
            }
        }
    })
    .await?;
    Ok(status)
}

#[tokio::test]
async fn started_workflow_runs_to_completion() -> Result<()> {
    let harness = Harness::new(StaticTranscriptionGateway::returning("See you tomorrow."));
    let engine = engine(&harness);

    let id = engine
        .start_workflow(&CorrelationId::new("vm-engine"), &voicemail_body("vm-engine", true))
        .await?;
    engine.wait(id).await;

    assert_eq!(
        outcome(&engine, id).await?,
        WorkflowOutcome::Completed(WorkflowResult::success("See you tomorrow."))
    );
    assert_eq!(engine.running_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn redelivered_event_reuses_instance() -> Result<()> {
    let harness = Harness::new(StaticTranscriptionGateway::returning("Once only."));
    let engine = engine(&harness);
    let correlation_id = CorrelationId::new("vm-dup");
    let body = voicemail_body("vm-dup", true);

    let first = engine.start_workflow(&correlation_id, &body).await?;
    let second = engine.start_workflow(&correlation_id, &body).await?;
    engine.wait(first).await;
    let third = engine.start_workflow(&correlation_id, &body).await?;
    engine.wait(third).await;

    assert_eq!(first, second);
    assert_eq!(first, third);
    assert_eq!(harness.transcriptions.call_count(), 1);
    assert_eq!(harness.store.recorded_voicemails().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_instance_has_no_result() -> Result<()> {
    let harness = Harness::new(StaticTranscriptionGateway::returning("unused"));
    let engine = engine(&harness);

    assert!(engine.workflow_result(InstanceId::new()).await?.is_none());
    assert!(!engine.cancel(InstanceId::new()).await?);
    Ok(())
}

#[tokio::test]
async fn running_instance_reports_custom_status() -> Result<()> {
    let harness = Harness::new(StaticTranscriptionGateway::returning("unused"));
    let engine = hanging_engine(&harness);

    let id = engine
        .start_workflow(&CorrelationId::new("vm-pending"), &voicemail_body("vm-pending", false))
        .await?;

    let status = wait_for_status(&engine, id, "ResolveAttachment (attempt").await?;

    assert_eq!(status, "ResolveAttachment (attempt 1)");
    engine.shutdown(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn cancel_stops_a_running_instance() -> Result<()> {
    let harness = Harness::new(StaticTranscriptionGateway::returning("unused"));
    let engine = hanging_engine(&harness);

    let id = engine
        .start_workflow(&CorrelationId::new("vm-cancel"), &voicemail_body("vm-cancel", false))
        .await?;

    assert!(engine.cancel(id).await?);
    tokio::time::timeout(Duration::from_secs(5), engine.wait(id)).await?;

    assert_eq!(outcome(&engine, id).await?, WorkflowOutcome::Cancelled);
    assert!(!engine.cancel(id).await?, "second cancel is a no-op");
    assert_eq!(harness.transcriptions.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn panicking_step_completes_with_internal_error() -> Result<()> {
    let harness = Harness::new(StaticTranscriptionGateway::panicking());
    let engine = engine(&harness);

    let id = engine
        .start_workflow(&CorrelationId::new("vm-panic"), &voicemail_body("vm-panic", true))
        .await?;
    engine.wait(id).await;

    assert_eq!(
        outcome(&engine, id).await?,
        WorkflowOutcome::Completed(WorkflowResult::error(WorkflowResult::INTERNAL_ERROR))
    );
    Ok(())
}

#[tokio::test]
async fn recover_resumes_unfinished_instances() -> Result<()> {
    let harness = Harness::new(StaticTranscriptionGateway::returning("Picked up later."));
    let correlation_id = CorrelationId::new("vm-orphan");
    let orphan = WorkflowInstance::new(
        &correlation_id,
        &voicemail_body("vm-orphan", true),
        harness.clock.now_utc(),
    );
    let (orphan, _) = harness.workflow_store().create_instance(orphan).await?;

    let engine = engine(&harness);
    assert_eq!(engine.recover().await?, 1);
    engine.wait(orphan.id).await;

    assert_eq!(
        outcome(&engine, orphan.id).await?,
        WorkflowOutcome::Completed(WorkflowResult::success("Picked up later."))
    );
    assert_eq!(engine.recover().await?, 0);
    Ok(())
}

#[tokio::test]
async fn shutdown_leaves_instances_resumable() -> Result<()> {
    let harness = Harness::with_messages(
        StaticTranscriptionGateway::returning("Survived a restart."),
        ScriptedMessageGateway::with_responses(vec![Ok(polled_message(
            TranscriptionStatus::Completed,
            true,
        ))]),
    );
    let before_restart = hanging_engine(&harness);

    let id = before_restart
        .start_workflow(&CorrelationId::new("vm-restart"), &voicemail_body("vm-restart", false))
        .await?;
    wait_for_status(&before_restart, id, "ResolveAttachment (attempt").await?;
    before_restart.shutdown(Duration::from_secs(5)).await?;

    let instance = harness.store.instance(id).await.expect("instance exists");
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(harness.store.payload_save_calls().await, 1);

    let after_restart = engine(&harness);
    assert_eq!(after_restart.recover().await?, 1);
    after_restart.wait(id).await;

    assert_eq!(
        outcome(&after_restart, id).await?,
        WorkflowOutcome::Completed(WorkflowResult::success("Survived a restart."))
    );
    assert_eq!(harness.store.payload_save_calls().await, 1, "payload save is not repeated");
    Ok(())
}

#[tokio::test]
async fn engine_refuses_new_work_after_shutdown() -> Result<()> {
    let harness = Harness::new(StaticTranscriptionGateway::returning("Too late."));
    let engine = engine(&harness);
    engine.shutdown(Duration::from_secs(1)).await?;

    let id = engine
        .start_workflow(&CorrelationId::new("vm-late"), &voicemail_body("vm-late", true))
        .await?;

    assert_eq!(engine.running_count().await, 0);
    assert!(matches!(outcome(&engine, id).await?, WorkflowOutcome::Pending { .. }));
    Ok(())
}
