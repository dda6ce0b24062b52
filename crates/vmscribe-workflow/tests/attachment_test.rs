//! Integration tests for transcription attachment polling.
//!
//! Polling runs in virtual time: durable timers and retry waits are recorded
//! by the `TestClock` instead of slept.

mod common;

use std::time::Duration;

use anyhow::Result;
use common::{polled_message, voicemail_body, Harness, MESSAGE_ID, TRANSCRIPTION_ATTACHMENT_ID};
use vmscribe_core::{models::TranscriptionStatus, parser, CorrelationId};
use vmscribe_workflow::{
    attachment::AttachmentResolver,
    gateway::mock::{ScriptedMessageGateway, StaticTranscriptionGateway},
    GatewayError, RetryPolicy, RetrySchedule,
};

fn harness(responses: Vec<vmscribe_workflow::Result<vmscribe_core::Message>>) -> Harness {
    Harness::with_messages(
        StaticTranscriptionGateway::returning("unused"),
        ScriptedMessageGateway::with_responses(responses),
    )
}

fn resolver(harness: &Harness) -> AttachmentResolver {
    AttachmentResolver::new(harness.messages.clone(), RetryPolicy::api(), RetrySchedule::default())
}

fn assert_between(actual: Duration, min_secs: u64, max_secs: u64) {
    assert!(
        actual >= Duration::from_secs(min_secs) && actual <= Duration::from_secs(max_secs),
        "expected wait between {min_secs}s and {max_secs}s, got {actual:?}"
    );
}

#[tokio::test]
async fn attachment_in_notification_needs_no_polling() -> Result<()> {
    let harness = harness(vec![]);
    let body = voicemail_body("vm-immediate", true);
    let event = parser::parse(&body)?;
    let scope = parser::parse_account_scope(&event.event_path)?;
    let ctx = harness.start("vm-immediate", &body).await;

    let found = resolver(&harness).resolve(&ctx, &event, scope).await?;

    assert_eq!(found, Some(TRANSCRIPTION_ATTACHMENT_ID));
    assert_eq!(harness.messages.call_count(), 0);
    assert!(harness.clock.recorded_sleeps().is_empty());
    Ok(())
}

#[tokio::test]
async fn polls_until_attachment_appears() -> Result<()> {
    let harness = harness(vec![
        Ok(polled_message(TranscriptionStatus::InProgress, false)),
        Ok(polled_message(TranscriptionStatus::InProgress, false)),
        Ok(polled_message(TranscriptionStatus::Completed, true)),
    ]);
    let body = voicemail_body("vm-polling", false);
    let event = parser::parse(&body)?;
    let scope = parser::parse_account_scope(&event.event_path)?;
    let ctx = harness.start("vm-polling", &body).await;

    let found = resolver(&harness).resolve(&ctx, &event, scope).await?;

    assert_eq!(found, Some(TRANSCRIPTION_ATTACHMENT_ID));
    assert_eq!(harness.messages.call_count(), 3);
    assert!(harness.messages.recorded_calls().iter().all(|(s, id)| *s == scope && *id == MESSAGE_ID));

    let sleeps = harness.clock.recorded_sleeps();
    assert_eq!(sleeps.len(), 3);
    assert_between(sleeps[0], 21, 23);
    assert_between(sleeps[1], 41, 43);
    assert_between(sleeps[2], 81, 83);

    let instance = harness.store.instance(ctx.instance_id()).await.expect("instance exists");
    assert_eq!(instance.custom_status, "ResolveAttachment (attempt 3)");
    Ok(())
}

#[tokio::test]
async fn terminal_status_stops_polling_early() -> Result<()> {
    let harness = harness(vec![
        Ok(polled_message(TranscriptionStatus::Failed, false)),
        Ok(polled_message(TranscriptionStatus::Completed, true)),
    ]);
    let body = voicemail_body("vm-failed", false);
    let event = parser::parse(&body)?;
    let scope = parser::parse_account_scope(&event.event_path)?;
    let ctx = harness.start("vm-failed", &body).await;

    let found = resolver(&harness).resolve(&ctx, &event, scope).await?;

    assert_eq!(found, None);
    assert_eq!(harness.messages.call_count(), 1);
    assert_eq!(harness.clock.recorded_sleeps().len(), 1);
    Ok(())
}

#[tokio::test]
async fn exhausted_schedule_gives_up() -> Result<()> {
    let harness = harness(vec![
        Ok(polled_message(TranscriptionStatus::InProgress, false)),
        Ok(polled_message(TranscriptionStatus::InProgress, false)),
        Ok(polled_message(TranscriptionStatus::InProgress, false)),
    ]);
    let body = voicemail_body("vm-exhausted", false);
    let event = parser::parse(&body)?;
    let scope = parser::parse_account_scope(&event.event_path)?;
    let ctx = harness.start("vm-exhausted", &body).await;

    let found = resolver(&harness).resolve(&ctx, &event, scope).await?;

    assert_eq!(found, None);
    assert_eq!(harness.messages.call_count(), 3);
    Ok(())
}

#[tokio::test]
async fn failed_fetch_counts_as_unknown_status() -> Result<()> {
    let harness = harness(vec![Err(GatewayError::api(404, "Resource not found"))]);
    let body = voicemail_body("vm-missing", false);
    let event = parser::parse(&body)?;
    let scope = parser::parse_account_scope(&event.event_path)?;
    let ctx = harness.start("vm-missing", &body).await;

    let found = resolver(&harness).resolve(&ctx, &event, scope).await?;

    assert_eq!(found, None);
    assert_eq!(harness.messages.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn transient_fetch_failures_are_retried_inside_an_attempt() -> Result<()> {
    let harness = harness(vec![
        Err(GatewayError::api(503, "unavailable")),
        Ok(polled_message(TranscriptionStatus::Completed, true)),
    ]);
    let body = voicemail_body("vm-flaky", false);
    let event = parser::parse(&body)?;
    let scope = parser::parse_account_scope(&event.event_path)?;
    let ctx = harness.start("vm-flaky", &body).await;

    let found = resolver(&harness).resolve(&ctx, &event, scope).await?;

    assert_eq!(found, Some(TRANSCRIPTION_ATTACHMENT_ID));
    assert_eq!(harness.messages.call_count(), 2);

    let sleeps = harness.clock.recorded_sleeps();
    assert_eq!(sleeps.len(), 2);
    assert_eq!(sleeps[1], Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn resumed_instance_replays_polling_history() -> Result<()> {
    let harness = harness(vec![
        Ok(polled_message(TranscriptionStatus::InProgress, false)),
        Ok(polled_message(TranscriptionStatus::Completed, true)),
    ]);
    let body = voicemail_body("vm-resume", false);
    let event = parser::parse(&body)?;
    let scope = parser::parse_account_scope(&event.event_path)?;
    let ctx = harness.start("vm-resume", &body).await;

    let first = resolver(&harness).resolve(&ctx, &event, scope).await?;
    let sleeps_after_first_run = harness.clock.recorded_sleeps().len();

    let resumed = harness.context(ctx.instance_id(), CorrelationId::new("vm-resume"));
    let second = resolver(&harness).resolve(&resumed, &event, scope).await?;

    assert_eq!(first, second);
    assert_eq!(harness.messages.call_count(), 2);
    assert_eq!(harness.clock.recorded_sleeps().len(), sleeps_after_first_run);
    Ok(())
}

#[tokio::test]
async fn cancellation_interrupts_polling() -> Result<()> {
    let harness = harness(vec![Ok(polled_message(TranscriptionStatus::InProgress, false))]);
    let body = voicemail_body("vm-cancel", false);
    let event = parser::parse(&body)?;
    let scope = parser::parse_account_scope(&event.event_path)?;
    let ctx = harness.start("vm-cancel", &body).await;
    ctx.cancellation().cancel();

    let result = resolver(&harness).resolve(&ctx, &event, scope).await;

    assert!(result.is_err_and(|err| err.is_cancelled()));
    assert_eq!(harness.messages.call_count(), 0);
    Ok(())
}
