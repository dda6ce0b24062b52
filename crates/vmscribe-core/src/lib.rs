//! Core domain models, payload parsing and persistence.
//!
//! Provides the voicemail notification types, the pure webhook parser, the
//! clock abstraction used by durable timers, and the Postgres repositories
//! backing payloads, transcriptions and workflow history. The workflow and
//! API crates build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod parser;
pub mod storage;
pub mod time;

pub use error::{CoreError, ParseError, Result};
pub use models::{
    AccountScope, Attachment, Checkpoint, ContactInfo, ContentDisposition, CorrelationId,
    InstanceId, InstanceStatus, Message, Party, PayloadId, ResultStatus, TranscriptionAttachmentRef,
    TranscriptionEntry, TranscriptionStatus, VoicemailRecord, WebhookEvent, WorkflowInstance,
    WorkflowResult,
};
pub use storage::Storage;
pub use time::{Clock, RealClock, TestClock};
