//! Polling for a transcription attachment that may not exist yet.
//!
//! The message store attaches the transcription some time after the
//! voicemail notification is sent. The resolver checks the notification
//! itself first and then re-fetches the message on a fixed delay table,
//! stopping early as soon as the upstream status says no transcription will
//! ever appear.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vmscribe_core::models::{
    AccountScope, TranscriptionAttachmentRef, TranscriptionStatus, WebhookEvent,
};

use crate::{
    checkpoint::WorkflowContext, error::WorkflowError, gateway::MessageGateway, retry::RetryPolicy,
};

/// Delay table and jitter range for attachment polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySchedule {
    /// Waits before each fetch, in order.
    pub delays: Vec<Duration>,
    /// Smallest jitter added to each wait, in seconds.
    pub jitter_min_seconds: u64,
    /// Largest jitter added to each wait, in seconds.
    pub jitter_max_seconds: u64,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_seconds(&[20, 40, 80], 1, 3)
    }
}

impl RetrySchedule {
    /// Builds a schedule from delays in seconds and an inclusive jitter range.
    pub fn from_seconds(delays: &[u64], jitter_min_seconds: u64, jitter_max_seconds: u64) -> Self {
        Self {
            delays: delays.iter().copied().map(Duration::from_secs).collect(),
            jitter_min_seconds,
            jitter_max_seconds: jitter_max_seconds.max(jitter_min_seconds),
        }
    }

    /// The longer 30/45/60/120 second table.
    pub fn extended() -> Self {
        Self::from_seconds(&[30, 45, 60, 120], 1, 3)
    }

    /// Draws a jitter from the configured range.
    pub fn jitter(&self) -> Duration {
        let seconds = rand::rng().random_range(self.jitter_min_seconds..=self.jitter_max_seconds);
        Duration::from_secs(seconds)
    }
}

/// What to do after observing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// The transcription attachment is present.
    Found(i64),
    /// Transcription is still running upstream.
    Continue,
    /// No transcription will appear.
    Stop,
}

impl PollDecision {
    /// Decides from an observed attachment pointer.
    pub fn from_ref(attachment: &TranscriptionAttachmentRef) -> Self {
        match (attachment.attachment_id, attachment.transcription_status) {
            (Some(id), _) => Self::Found(id),
            (None, status) if status.is_pending() => Self::Continue,
            (None, _) => Self::Stop,
        }
    }
}

/// Resolves the transcription attachment of a voicemail.
pub struct AttachmentResolver {
    messages: Arc<dyn MessageGateway>,
    policy: RetryPolicy,
    schedule: RetrySchedule,
}

impl AttachmentResolver {
    /// Creates a resolver fetching through `messages` under `policy`.
    pub fn new(messages: Arc<dyn MessageGateway>, policy: RetryPolicy, schedule: RetrySchedule) -> Self {
        Self { messages, policy, schedule }
    }

    /// Returns the transcription attachment id, or `None` if it never
    /// appeared.
    ///
    /// Each wait is a durable timer and each fetch a checkpointed step, so a
    /// resumed instance continues polling where it left off. A fetch that
    /// still fails after retries is treated as status `Unknown` and ends the
    /// loop.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::Cancelled` or a checkpoint store failure.
    pub async fn resolve(
        &self,
        ctx: &WorkflowContext,
        event: &WebhookEvent,
        scope: AccountScope,
    ) -> Result<Option<i64>, WorkflowError> {
        if let Some(id) = event.message.transcription_attachment_id() {
            debug!(
                correlation_id = %ctx.correlation_id(),
                attachment_id = id,
                "attachment present in notification"
            );
            return Ok(Some(id));
        }

        let message_id = event.message_id();

        for (index, delay) in self.schedule.delays.iter().enumerate() {
            let attempt = index + 1;
            ctx.set_custom_status(&format!("ResolveAttachment (attempt {attempt})")).await?;
            ctx.sleep(&format!("AttachmentDelay{attempt}"), *delay + self.schedule.jitter()).await?;

            let observed: TranscriptionAttachmentRef = ctx
                .step(&format!("FetchMessage{attempt}"), || self.fetch(ctx, scope, message_id))
                .await?;

            match PollDecision::from_ref(&observed) {
                PollDecision::Found(id) => {
                    info!(
                        correlation_id = %ctx.correlation_id(),
                        attempt,
                        attachment_id = id,
                        "transcription attachment found"
                    );
                    return Ok(Some(id));
                },
                PollDecision::Continue => {
                    debug!(correlation_id = %ctx.correlation_id(), attempt, "transcription in progress");
                },
                PollDecision::Stop => {
                    info!(
                        correlation_id = %ctx.correlation_id(),
                        attempt,
                        status = %observed.transcription_status,
                        "transcription will not become available"
                    );
                    return Ok(None);
                },
            }
        }

        info!(correlation_id = %ctx.correlation_id(), "attachment polling exhausted");
        Ok(None)
    }

    async fn fetch(
        &self,
        ctx: &WorkflowContext,
        scope: AccountScope,
        message_id: i64,
    ) -> Result<TranscriptionAttachmentRef, WorkflowError> {
        let messages = &self.messages;
        let result = self
            .policy
            .execute(ctx.clock(), ctx.cancellation(), ctx.correlation_id(), move || {
                messages.fetch_message(scope, message_id)
            })
            .await;

        match result {
            Ok(message) => Ok(TranscriptionAttachmentRef::from_message(&message)),
            Err(error) if error.is_cancelled() => Err(WorkflowError::Cancelled),
            Err(error) => {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    message_id,
                    error = %error,
                    "message fetch failed, treating transcription status as unknown"
                );
                Ok(TranscriptionAttachmentRef {
                    attachment_id: None,
                    transcription_status: TranscriptionStatus::Unknown,
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(attachment_id: Option<i64>, status: TranscriptionStatus) -> TranscriptionAttachmentRef {
        TranscriptionAttachmentRef { attachment_id, transcription_status: status }
    }

    #[test]
    fn attachment_wins_over_status() {
        assert_eq!(
            PollDecision::from_ref(&observed(Some(7), TranscriptionStatus::Failed)),
            PollDecision::Found(7)
        );
    }

    #[test]
    fn only_in_progress_keeps_polling() {
        assert_eq!(
            PollDecision::from_ref(&observed(None, TranscriptionStatus::InProgress)),
            PollDecision::Continue
        );
        for status in [
            TranscriptionStatus::Completed,
            TranscriptionStatus::CompletedPartially,
            TranscriptionStatus::NotAvailable,
            TranscriptionStatus::TimedOut,
            TranscriptionStatus::Failed,
            TranscriptionStatus::Unknown,
        ] {
            assert_eq!(PollDecision::from_ref(&observed(None, status)), PollDecision::Stop);
        }
    }

    #[test]
    fn jitter_stays_in_range() {
        let schedule = RetrySchedule::default();
        for _ in 0..100 {
            let jitter = schedule.jitter();
            assert!(jitter >= Duration::from_secs(1) && jitter <= Duration::from_secs(3));
        }
    }

    #[test]
    fn extended_table() {
        let delays: Vec<u64> = RetrySchedule::extended().delays.iter().map(Duration::as_secs).collect();
        assert_eq!(delays, vec![30, 45, 60, 120]);
    }
}
