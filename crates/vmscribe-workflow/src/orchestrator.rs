//! The voicemail transcription workflow.
//!
//! A fixed linear pipeline:
//!
//! 1. **ParsePayload** - decode and validate the notification
//! 2. **SavePayload** - persist the raw body for audit
//! 3. **ResolveAttachment** - find the transcription attachment, polling if
//!    it is not attached yet
//! 4. **FetchTranscription** - download the transcription text
//! 5. **SaveTranscription** - persist the voicemail record
//! 6. **WriteToFile** - append a row to the shared spreadsheet
//!
//! Each side-effecting state runs as a checkpointed step, so a resumed
//! instance skips everything it already did.

use std::sync::Arc;

use tracing::{error, info, warn};
use vmscribe_core::{
    models::{
        ContactInfo, ContentDisposition, PayloadId, VoicemailRecord, WebhookEvent, WorkflowResult,
        AUDIO_RECORDING, AUDIO_TRANSCRIPTION,
    },
    parser,
};

use crate::{
    attachment::{AttachmentResolver, RetrySchedule},
    checkpoint::WorkflowContext,
    error::{GatewayError, WorkflowError},
    gateway::{MessageGateway, TranscriptionGateway},
    retry::RetryPolicies,
    shared_file::SharedFileCoordinator,
    storage::{PayloadStore, VoicemailStore},
};

/// Collaborators of the workflow.
pub struct WorkflowDependencies {
    /// Message fetches during attachment polling.
    pub messages: Arc<dyn MessageGateway>,
    /// Transcription content fetches.
    pub transcriptions: Arc<dyn TranscriptionGateway>,
    /// Raw payload audit store.
    pub payloads: Arc<dyn PayloadStore>,
    /// Voicemail store.
    pub voicemails: Arc<dyn VoicemailStore>,
    /// Shared spreadsheet.
    pub shared_file: Arc<SharedFileCoordinator>,
}

/// Voicemail transcription workflow.
pub struct VoicemailWorkflow {
    transcriptions: Arc<dyn TranscriptionGateway>,
    payloads: Arc<dyn PayloadStore>,
    voicemails: Arc<dyn VoicemailStore>,
    shared_file: Arc<SharedFileCoordinator>,
    resolver: AttachmentResolver,
    policies: RetryPolicies,
}

impl VoicemailWorkflow {
    /// Creates the workflow.
    pub fn new(
        deps: WorkflowDependencies,
        policies: RetryPolicies,
        schedule: RetrySchedule,
    ) -> Self {
        Self {
            resolver: AttachmentResolver::new(deps.messages, policies.api.clone(), schedule),
            transcriptions: deps.transcriptions,
            payloads: deps.payloads,
            voicemails: deps.voicemails,
            shared_file: deps.shared_file,
            policies,
        }
    }

    /// Runs the workflow to its terminal result.
    ///
    /// Every failure other than cancellation is logged and reported as
    /// `Internal server error`.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::Cancelled` when the instance or the engine was
    /// cancelled. The instance keeps its history and can be resumed.
    pub async fn run(
        &self,
        ctx: &WorkflowContext,
        raw_body: &str,
    ) -> Result<WorkflowResult, WorkflowError> {
        match self.process(ctx, raw_body).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_cancelled() => Err(WorkflowError::Cancelled),
            Err(err) => {
                error!(
                    correlation_id = %ctx.correlation_id(),
                    instance_id = %ctx.instance_id(),
                    error = %err,
                    "workflow failed"
                );
                Ok(WorkflowResult::error(WorkflowResult::INTERNAL_ERROR))
            },
        }
    }

    async fn process(
        &self,
        ctx: &WorkflowContext,
        raw_body: &str,
    ) -> Result<WorkflowResult, WorkflowError> {
        let correlation_id = ctx.correlation_id();

        ctx.set_custom_status("ParsePayload").await?;
        let event = match parser::parse(raw_body) {
            Ok(event) if parser::is_valid_payload(&event) => event,
            Ok(_) => {
                warn!(correlation_id = %correlation_id, "payload has no event path");
                return Ok(WorkflowResult::error(WorkflowResult::INVALID_PAYLOAD));
            },
            Err(err) => {
                warn!(correlation_id = %correlation_id, error = %err, "payload could not be parsed");
                return Ok(WorkflowResult::error(WorkflowResult::INVALID_PAYLOAD));
            },
        };

        ctx.set_custom_status("SavePayload").await?;
        let payload_id: PayloadId = ctx
            .step("SavePayload", || async {
                let payloads = &self.payloads;
                let saved = self
                    .policies
                    .database
                    .execute(ctx.clock(), ctx.cancellation(), correlation_id, move || async move {
                        payloads
                            .save_raw_payload(correlation_id, raw_body)
                            .await
                            .map_err(GatewayError::from)
                    })
                    .await?;
                Ok(saved)
            })
            .await?;
        info!(correlation_id = %correlation_id, payload_id = %payload_id, "raw payload saved");

        ctx.set_custom_status("ResolveAttachment").await?;
        if !parser::is_voicemail_event(&event) {
            warn!(
                correlation_id = %correlation_id,
                event_path = %event.event_path,
                "event is not a voicemail notification"
            );
            return Ok(WorkflowResult::error(WorkflowResult::INVALID_EVENT_TYPE));
        }

        let scope = parser::parse_account_scope(&event.event_path)?;
        let Some(attachment_id) = self.resolver.resolve(ctx, &event, scope).await? else {
            return Ok(WorkflowResult::error(WorkflowResult::ATTACHMENT_NOT_FOUND));
        };

        ctx.set_custom_status("FetchTranscription").await?;
        let message_id = event.message_id();
        let transcription: String = ctx
            .step("FetchTranscription", || async {
                let transcriptions = &self.transcriptions;
                let text = self
                    .policies
                    .api
                    .execute(ctx.clock(), ctx.cancellation(), correlation_id, move || {
                        transcriptions.fetch_transcription_content(
                            scope,
                            message_id,
                            attachment_id,
                            ContentDisposition::Inline,
                        )
                    })
                    .await?;
                Ok(text)
            })
            .await?;

        if transcription.trim().is_empty() {
            warn!(correlation_id = %correlation_id, attachment_id, "transcription is blank");
            return Ok(WorkflowResult::error(WorkflowResult::TRANSCRIPTION_FETCH_FAILED));
        }

        ctx.set_custom_status("SaveTranscription").await?;
        let record: VoicemailRecord = ctx
            .step("SaveTranscription", || async {
                let record = build_record(&event, &transcription, ctx);
                let voicemails = &self.voicemails;
                let stored = &record;
                let inserted = self
                    .policies
                    .database
                    .execute(ctx.clock(), ctx.cancellation(), correlation_id, move || async move {
                        voicemails
                            .save_transcription(payload_id, stored)
                            .await
                            .map_err(GatewayError::from)
                    })
                    .await?;
                if !inserted {
                    info!(
                        correlation_id = %correlation_id,
                        external_uuid = %record.external_uuid,
                        "voicemail already recorded"
                    );
                }
                Ok(record)
            })
            .await?;
        info!(correlation_id = %correlation_id, "transcription saved");

        ctx.set_custom_status("WriteToFile").await?;
        ctx.step("WriteToFile", || async {
            self.shared_file
                .append_entry(&(&record).into(), ctx.clock(), ctx.cancellation(), correlation_id)
                .await?;
            Ok(())
        })
        .await?;

        ctx.set_custom_status("Completed").await?;
        info!(correlation_id = %correlation_id, "voicemail transcription workflow completed");
        Ok(WorkflowResult::success(transcription))
    }
}

/// Maps a voicemail event and its transcription to the stored record.
///
/// The first `to` party is the recipient; a message without recipients gets
/// an empty contact. The call time falls back to the notification timestamp
/// and then to the current time. A notification without a `uuid` is keyed by
/// the instance's correlation id, which is generated for such notifications.
pub fn build_record(
    event: &WebhookEvent,
    transcription: &str,
    ctx: &WorkflowContext,
) -> VoicemailRecord {
    let message = &event.message;
    let uri_of = |kind: &str| message.attachment_of_type(kind).map(|a| a.uri.clone());

    let external_uuid = if event.id.trim().is_empty() {
        ctx.correlation_id().to_string()
    } else {
        event.id.clone()
    };

    VoicemailRecord {
        external_uuid,
        call_date_time: message
            .creation_time
            .or(event.timestamp_utc)
            .unwrap_or_else(|| ctx.clock().now_utc()),
        from_contact: message.from.as_ref().map(ContactInfo::from).unwrap_or_default(),
        to_contact: message.to.first().map(ContactInfo::from).unwrap_or_default(),
        transcription_text: transcription.to_string(),
        audio_transcription_uri: uri_of(AUDIO_TRANSCRIPTION),
        audio_recording_uri: uri_of(AUDIO_RECORDING),
    }
}
