//! Shared fixtures for workflow integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use vmscribe_core::{
    models::{Attachment, Message, TranscriptionStatus, WorkflowInstance},
    Clock, CorrelationId, InstanceId, TestClock,
};
use vmscribe_workflow::{
    checkpoint::WorkflowContext,
    gateway::{
        mock::{ScriptedMessageGateway, StaticTranscriptionGateway},
        MessageGateway, TranscriptionGateway,
    },
    storage::{mock::MockStore, WorkflowStore},
    CsvSpreadsheetCodec, InMemoryFileGateway, RetryPolicies, RetryPolicy, RetrySchedule,
    SharedFileCoordinator, VoicemailWorkflow, WorkflowDependencies,
};

pub const VOICEMAIL_EVENT: &str = "/restapi/v1.0/account/123/extension/456/voicemail";
pub const MESSAGE_ID: i64 = 987;
pub const TRANSCRIPTION_ATTACHMENT_ID: i64 = 2;
pub const SHARED_ROOT: &str = "/shared";
pub const SHARED_FILE: &str = "voicemails.csv";
pub const SHARED_PATH: &str = "/shared/voicemails.csv";

fn attachments(with_transcription: bool) -> Value {
    let mut attachments = vec![json!({
        "id": 1,
        "uri": "https://media.example.com/recording/1",
        "type": "AudioRecording"
    })];
    if with_transcription {
        attachments.push(json!({
            "id": TRANSCRIPTION_ATTACHMENT_ID,
            "uri": "https://media.example.com/transcription/2",
            "type": "AudioTranscription"
        }));
    }
    Value::Array(attachments)
}

/// Webhook body for an event path and message.
pub fn notification(uuid: &str, event: &str, with_transcription: bool) -> String {
    json!({
        "uuid": uuid,
        "event": event,
        "timestamp": "2024-03-01T17:45:15.000Z",
        "subscriptionId": "sub-1",
        "ownerId": "456",
        "body": {
            "id": MESSAGE_ID,
            "type": "VoiceMail",
            "creationTime": "2024-03-01T17:44:58.000Z",
            "from": {"phoneNumber": "+15551230001", "name": "Jane Caller"},
            "to": [{"phoneNumber": "+15551230002", "name": "Front Desk"}],
            "attachments": attachments(with_transcription),
            "vmTranscriptionStatus": if with_transcription { "Completed" } else { "InProgress" }
        }
    })
    .to_string()
}

/// Voicemail notification for `uuid`.
pub fn voicemail_body(uuid: &str, with_transcription: bool) -> String {
    notification(uuid, VOICEMAIL_EVENT, with_transcription)
}

/// Message as returned by the message store while polling.
pub fn polled_message(status: TranscriptionStatus, with_transcription: bool) -> Message {
    let mut message =
        Message { id: MESSAGE_ID, vm_transcription_status: status, ..Message::default() };
    if with_transcription {
        message.attachments.push(Attachment {
            id: TRANSCRIPTION_ATTACHMENT_ID,
            uri: "https://media.example.com/transcription/2".to_string(),
            attachment_type: "AudioTranscription".to_string(),
            ..Attachment::default()
        });
    }
    message
}

fn build_workflow(
    store: &MockStore,
    files: &InMemoryFileGateway,
    messages: Arc<dyn MessageGateway>,
    transcriptions: Arc<dyn TranscriptionGateway>,
) -> Arc<VoicemailWorkflow> {
    let shared_file = SharedFileCoordinator::new(
        Arc::new(files.clone()),
        Arc::new(CsvSpreadsheetCodec::new()),
        RetryPolicy::file(),
        SHARED_ROOT,
        SHARED_FILE,
    );

    Arc::new(VoicemailWorkflow::new(
        WorkflowDependencies {
            messages,
            transcriptions,
            payloads: Arc::new(store.clone()),
            voicemails: Arc::new(store.clone()),
            shared_file: Arc::new(shared_file),
        },
        RetryPolicies::default(),
        RetrySchedule::default(),
    ))
}

/// Workflow wired to in-memory collaborators and a virtual clock.
pub struct Harness {
    pub clock: TestClock,
    pub store: MockStore,
    pub messages: Arc<ScriptedMessageGateway>,
    pub transcriptions: Arc<StaticTranscriptionGateway>,
    pub files: InMemoryFileGateway,
    pub workflow: Arc<VoicemailWorkflow>,
}

impl Harness {
    pub fn new(transcriptions: StaticTranscriptionGateway) -> Self {
        Self::with_messages(transcriptions, ScriptedMessageGateway::new())
    }

    pub fn with_messages(
        transcriptions: StaticTranscriptionGateway,
        messages: ScriptedMessageGateway,
    ) -> Self {
        let clock = TestClock::new();
        let store = MockStore::with_clock(Arc::new(clock.clone()));
        let messages = Arc::new(messages);
        let transcriptions = Arc::new(transcriptions);
        let files = InMemoryFileGateway::new();
        let workflow = build_workflow(&store, &files, messages.clone(), transcriptions.clone());

        Self { clock, store, messages, transcriptions, files, workflow }
    }

    /// Workflow sharing this harness's stores but fetching messages from
    /// `messages`.
    pub fn workflow_with_messages(&self, messages: Arc<dyn MessageGateway>) -> Arc<VoicemailWorkflow> {
        build_workflow(&self.store, &self.files, messages, self.transcriptions.clone())
    }

    pub fn workflow_store(&self) -> Arc<dyn WorkflowStore> {
        Arc::new(self.store.clone())
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// Persists an instance for `body` and returns a fresh context for it.
    pub async fn start(&self, correlation_id: &str, body: &str) -> WorkflowContext {
        let correlation_id = CorrelationId::new(correlation_id);
        let instance = WorkflowInstance::new(&correlation_id, body, self.clock.now_utc());
        let (instance, _) = self
            .workflow_store()
            .create_instance(instance)
            .await
            .expect("instance should be stored");
        self.context(instance.id, correlation_id)
    }

    /// Context for an existing instance, positioned at the start of its
    /// history.
    pub fn context(&self, instance_id: InstanceId, correlation_id: CorrelationId) -> WorkflowContext {
        WorkflowContext::new(
            instance_id,
            correlation_id,
            self.workflow_store(),
            self.clock(),
            CancellationToken::new(),
        )
    }
}
