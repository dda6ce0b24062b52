//! Domain models and strongly-typed identifiers.
//!
//! Covers three groups of types: the wire shape of inbound voicemail
//! notifications and message-store resources, the business records built
//! from them, and the bookkeeping rows of the durable workflow (instances and
//! checkpoints).

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Attachment type tag of a voicemail transcription.
pub const AUDIO_TRANSCRIPTION: &str = "AudioTranscription";

/// Attachment type tag of a voicemail audio recording.
pub const AUDIO_RECORDING: &str = "AudioRecording";

/// Strongly-typed workflow instance identifier.
///
/// Handed back to the webhook caller so it can poll for the terminal result
/// after the request that triggered the workflow has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Creates a new random instance ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for InstanceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for InstanceId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for InstanceId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for InstanceId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Correlation identifier of one webhook event.
///
/// Stable across webhook redeliveries. Used as the idempotency key for
/// workflow instances and stored payloads, and as the log correlation field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Wraps an existing correlation value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh correlation id for payloads that carry none.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the correlation id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Database identifier of a stored raw webhook payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadId(pub i64);

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account and extension a voicemail belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountScope {
    /// Account identifier from the event path.
    pub account_id: i64,
    /// Extension identifier from the event path.
    pub extension_id: i64,
}

/// Transcription status reported by the message store.
///
/// Only `InProgress` can still change. Every other status is terminal.
/// Unknown strings deserialize as [`TranscriptionStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TranscriptionStatus {
    /// Transcription is not available for this message.
    NotAvailable,
    /// Transcription job is still running upstream.
    InProgress,
    /// Transcription job timed out upstream.
    TimedOut,
    /// Transcription finished.
    Completed,
    /// Transcription finished for part of the audio.
    CompletedPartially,
    /// Transcription job failed upstream.
    Failed,
    /// Status was missing or not recognised.
    #[default]
    #[serde(other)]
    Unknown,
}

impl TranscriptionStatus {
    /// Returns true if polling again may yield a different result.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::InProgress)
    }
}

impl fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotAvailable => "NotAvailable",
            Self::InProgress => "InProgress",
            Self::TimedOut => "TimedOut",
            Self::Completed => "Completed",
            Self::CompletedPartially => "CompletedPartially",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Caller or callee of a voicemail message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Party {
    /// Phone number in E.164 form.
    pub phone_number: Option<String>,
    /// Display name, when known.
    pub name: Option<String>,
    /// Internal extension number, when the party is internal.
    pub extension_number: Option<String>,
}

/// Sub-resource of a message, such as the audio or its transcription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Attachment {
    /// Attachment identifier.
    pub id: i64,
    /// Canonical URI of the attachment content.
    pub uri: String,
    /// Type tag, for example `AudioRecording` or `AudioTranscription`.
    #[serde(rename = "type")]
    pub attachment_type: String,
    /// MIME type of the content.
    pub content_type: Option<String>,
    /// Voicemail duration in seconds.
    pub vm_duration: Option<i64>,
    /// Suggested file name.
    pub file_name: Option<String>,
}

/// A message-store message, as carried by a notification body or returned
/// by the message API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    /// Message identifier.
    pub id: i64,
    /// Canonical URI of the message.
    pub uri: Option<String>,
    /// Message type, `VoiceMail` for voicemails.
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    /// When the message was created upstream.
    pub creation_time: Option<DateTime<Utc>>,
    /// When the message was last modified upstream.
    pub last_modified_time: Option<DateTime<Utc>>,
    /// `Inbound` or `Outbound`.
    pub direction: Option<String>,
    /// `Read` or `Unread`.
    pub read_status: Option<String>,
    /// `Alive`, `Deleted` or `Purged`.
    pub availability: Option<String>,
    /// Delivery status of the message.
    pub message_status: Option<String>,
    /// Caller.
    pub from: Option<Party>,
    /// Recipients.
    pub to: Vec<Party>,
    /// Attached resources in upstream order.
    pub attachments: Vec<Attachment>,
    /// Status of the voicemail transcription job.
    pub vm_transcription_status: TranscriptionStatus,
}

impl Message {
    /// Returns the first attachment with the given type tag.
    pub fn attachment_of_type(&self, attachment_type: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|attachment| attachment.attachment_type == attachment_type)
    }

    /// Returns the transcription attachment id, if one is attached.
    pub fn transcription_attachment_id(&self) -> Option<i64> {
        self.attachment_of_type(AUDIO_TRANSCRIPTION).map(|attachment| attachment.id)
    }
}

/// Wire envelope of an inbound notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookEnvelope {
    /// Notification UUID.
    pub uuid: Option<String>,
    /// Event path, for example
    /// `/restapi/v1.0/account/1/extension/2/voicemail`.
    pub event: Option<String>,
    /// When the notification was emitted.
    pub timestamp: Option<DateTime<Utc>>,
    /// Subscription that produced the notification.
    pub subscription_id: Option<String>,
    /// Owner of the subscription.
    pub owner_id: Option<String>,
    /// The message the notification is about.
    pub body: Option<Message>,
}

/// One parsed inbound voicemail notification.
///
/// Immutable once parsed. The raw body is kept verbatim for audit storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Payload UUID, empty when the notification carried none.
    pub id: String,
    /// Event path identifying the event type and its account scope.
    pub event_path: String,
    /// When the notification was emitted.
    pub timestamp_utc: Option<DateTime<Utc>>,
    /// Subscription that produced the notification.
    pub subscription_id: Option<String>,
    /// The message the notification is about.
    pub message: Message,
    /// Original request body.
    pub raw_body: String,
}

impl WebhookEvent {
    /// Builds an event from a decoded envelope and the body it came from.
    pub fn from_envelope(envelope: WebhookEnvelope, raw_body: impl Into<String>) -> Self {
        Self {
            id: envelope.uuid.unwrap_or_default(),
            event_path: envelope.event.unwrap_or_default(),
            timestamp_utc: envelope.timestamp,
            subscription_id: envelope.subscription_id,
            message: envelope.body.unwrap_or_default(),
            raw_body: raw_body.into(),
        }
    }

    /// Message identifier of the voicemail.
    pub fn message_id(&self) -> i64 {
        self.message.id
    }
}

/// Resolved pointer to a transcription resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionAttachmentRef {
    /// Attachment id when the transcription is attached.
    pub attachment_id: Option<i64>,
    /// Upstream status observed alongside the attachment list.
    pub transcription_status: TranscriptionStatus,
}

impl TranscriptionAttachmentRef {
    /// Reads the transcription pointer from a message.
    pub fn from_message(message: &Message) -> Self {
        Self {
            attachment_id: message.transcription_attachment_id(),
            transcription_status: message.vm_transcription_status,
        }
    }
}

/// How attachment content is delivered by the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentDisposition {
    /// Rendered inline.
    #[default]
    Inline,
    /// Served as a download.
    Attachment,
}

impl ContentDisposition {
    /// Query-string value understood by the message store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "Inline",
            Self::Attachment => "Attachment",
        }
    }
}

/// Phone number and display name pair stored with a voicemail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Phone number.
    pub phone_number: String,
    /// Display name.
    pub name: String,
}

impl From<&Party> for ContactInfo {
    fn from(party: &Party) -> Self {
        Self {
            phone_number: party.phone_number.clone().unwrap_or_default(),
            name: party.name.clone().unwrap_or_default(),
        }
    }
}

/// Persisted voicemail with its transcription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoicemailRecord {
    /// Payload UUID of the originating notification.
    pub external_uuid: String,
    /// When the voicemail was left.
    pub call_date_time: DateTime<Utc>,
    /// Caller.
    pub from_contact: ContactInfo,
    /// First recipient.
    pub to_contact: ContactInfo,
    /// Transcription text, never blank.
    pub transcription_text: String,
    /// URI of the transcription attachment.
    pub audio_transcription_uri: Option<String>,
    /// URI of the audio recording attachment.
    pub audio_recording_uri: Option<String>,
}

/// Row appended to the shared transcription spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionEntry {
    /// Payload UUID.
    pub uuid: String,
    /// When the voicemail was left.
    pub creation_time: DateTime<Utc>,
    /// Caller phone number.
    pub from_phone_number: String,
    /// Recipient phone number.
    pub to_phone_number: String,
    /// Transcription text.
    pub transcription: String,
}

impl From<&VoicemailRecord> for TranscriptionEntry {
    fn from(record: &VoicemailRecord) -> Self {
        Self {
            uuid: record.external_uuid.clone(),
            creation_time: record.call_date_time,
            from_phone_number: record.from_contact.phone_number.clone(),
            to_phone_number: record.to_contact.phone_number.clone(),
            transcription: record.transcription_text.clone(),
        }
    }
}

/// Terminal status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// The transcription was stored and appended.
    Success,
    /// The run stopped with a reason.
    Error,
}

/// Terminal outcome of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Success or error.
    pub status: ResultStatus,
    /// Human-readable summary.
    pub message: String,
    /// Transcription text on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
}

impl WorkflowResult {
    /// Message of a successful run.
    pub const SUCCESS: &'static str = "Transcription saved successfully";
    /// The body could not be parsed or has no event path.
    pub const INVALID_PAYLOAD: &'static str = "Invalid payload";
    /// The event is not a voicemail notification.
    pub const INVALID_EVENT_TYPE: &'static str = "Invalid event type";
    /// No transcription attachment appeared in time.
    pub const ATTACHMENT_NOT_FOUND: &'static str = "Transcription attachment not found";
    /// The transcription content was blank.
    pub const TRANSCRIPTION_FETCH_FAILED: &'static str = "Failed to fetch transcription";
    /// Catch-all for unexpected failures.
    pub const INTERNAL_ERROR: &'static str = "Internal server error";

    /// Creates a success result carrying the transcription.
    pub fn success(transcription: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Success,
            message: Self::SUCCESS.to_string(),
            transcription: Some(transcription.into()),
        }
    }

    /// Creates an error result with the given reason.
    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ResultStatus::Error, message: message.into(), transcription: None }
    }

    /// Returns true for a success result.
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Lifecycle state of a workflow instance.
///
/// ```text
/// Running -> Completed
///         -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Scheduled or executing. Resumed after a restart.
    Running,
    /// Finished with a recorded result.
    Completed,
    /// Cancelled on request. Never resumed.
    Cancelled,
}

impl InstanceStatus {
    /// Returns true once the instance will not execute again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid instance status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for InstanceStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for InstanceStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

/// One durable workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowInstance {
    /// Instance identifier.
    pub id: InstanceId,
    /// Correlation id of the triggering event. Unique.
    pub correlation_id: String,
    /// Original webhook body, replayed into the workflow on resume.
    pub raw_body: String,
    /// Lifecycle state.
    pub status: InstanceStatus,
    /// Name of the step currently executing.
    pub custom_status: String,
    /// Terminal result once completed.
    pub result: Option<Json<WorkflowResult>>,
    /// When the instance was scheduled.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Creates a running instance for a new event.
    pub fn new(correlation_id: &CorrelationId, raw_body: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: InstanceId::new(),
            correlation_id: correlation_id.0.clone(),
            raw_body: raw_body.to_string(),
            status: InstanceStatus::Running,
            custom_status: "Scheduled".to_string(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Correlation id of the triggering event.
    pub fn correlation(&self) -> CorrelationId {
        CorrelationId(self.correlation_id.clone())
    }
}

/// Recorded output of one completed workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Checkpoint {
    /// Owning instance.
    pub instance_id: InstanceId,
    /// Position of the step in the execution history.
    pub sequence: i32,
    /// Name of the step, checked on replay.
    pub step_name: String,
    /// Serialized step output.
    pub output: serde_json::Value,
    /// When the step completed.
    pub recorded_at: DateTime<Utc>,
}
