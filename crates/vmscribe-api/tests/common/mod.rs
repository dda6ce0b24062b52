//! Shared fixtures for API tests.

#![allow(dead_code)]

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use vmscribe_api::{create_router, AppState, DatabaseHealth};
use vmscribe_core::{models::AccountScope, CoreError, Message, TestClock};
use vmscribe_workflow::{
    gateway::{
        mock::{ScriptedMessageGateway, StaticTranscriptionGateway},
        MessageGateway,
    },
    storage::mock::MockStore,
    CsvSpreadsheetCodec, InMemoryFileGateway, RetryPolicies, RetryPolicy, RetrySchedule,
    SharedFileCoordinator, VoicemailWorkflow, WorkflowDependencies, WorkflowEngine,
};

pub const VERIFICATION_TOKEN: &str = "hook-secret";

/// Database health with a fixed answer.
pub struct StaticHealth {
    healthy: bool,
}

impl DatabaseHealth for StaticHealth {
    fn ping(&self) -> Pin<Box<dyn Future<Output = vmscribe_core::Result<()>> + Send + '_>> {
        let healthy = self.healthy;
        Box::pin(async move {
            if healthy {
                Ok(())
            } else {
                Err(CoreError::transient("connection refused"))
            }
        })
    }
}

/// Message gateway whose fetches never complete.
pub struct HangingMessageGateway;

impl MessageGateway for HangingMessageGateway {
    fn fetch_message(
        &self,
        _scope: AccountScope,
        _message_id: i64,
    ) -> Pin<Box<dyn Future<Output = vmscribe_workflow::Result<Message>> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

/// Voicemail notification for `uuid`.
pub fn voicemail_body(uuid: &str, with_transcription: bool) -> String {
    let mut attachments = vec![json!({
        "id": 1,
        "uri": "https://media.example.com/recording/1",
        "type": "AudioRecording"
    })];
    if with_transcription {
        attachments.push(json!({
            "id": 2,
            "uri": "https://media.example.com/transcription/2",
            "type": "AudioTranscription"
        }));
    }

    json!({
        "uuid": uuid,
        "event": "/restapi/v1.0/account/123/extension/456/voicemail",
        "timestamp": "2024-03-01T17:45:15.000Z",
        "body": {
            "id": 987,
            "type": "VoiceMail",
            "creationTime": "2024-03-01T17:44:58.000Z",
            "from": {"phoneNumber": "+15551230001", "name": "Jane Caller"},
            "to": [{"phoneNumber": "+15551230002"}],
            "attachments": attachments,
            "vmTranscriptionStatus": if with_transcription { "Completed" } else { "InProgress" }
        }
    })
    .to_string()
}

/// Router backed by in-memory collaborators.
pub struct TestApp {
    pub router: Router,
    pub engine: Arc<WorkflowEngine>,
    pub store: MockStore,
    pub files: InMemoryFileGateway,
}

impl TestApp {
    /// App whose message store answers immediately.
    pub fn new() -> Self {
        Self::build(Arc::new(ScriptedMessageGateway::new()), true)
    }

    /// App whose attachment polling never finishes.
    pub fn hanging() -> Self {
        Self::build(Arc::new(HangingMessageGateway), true)
    }

    /// App reporting an unreachable database.
    pub fn with_unhealthy_database() -> Self {
        Self::build(Arc::new(ScriptedMessageGateway::new()), false)
    }

    fn build(messages: Arc<dyn MessageGateway>, healthy: bool) -> Self {
        let clock = TestClock::new();
        let store = MockStore::with_clock(Arc::new(clock.clone()));
        let files = InMemoryFileGateway::new();

        let shared_file = SharedFileCoordinator::new(
            Arc::new(files.clone()),
            Arc::new(CsvSpreadsheetCodec::new()),
            RetryPolicy::file(),
            "/shared",
            "voicemails.csv",
        );
        let workflow = Arc::new(VoicemailWorkflow::new(
            WorkflowDependencies {
                messages,
                transcriptions: Arc::new(StaticTranscriptionGateway::returning("Please call back.")),
                payloads: Arc::new(store.clone()),
                voicemails: Arc::new(store.clone()),
                shared_file: Arc::new(shared_file),
            },
            RetryPolicies::default(),
            RetrySchedule::default(),
        ));
        let engine =
            Arc::new(WorkflowEngine::new(Arc::new(store.clone()), workflow, Arc::new(clock.clone())));

        let state = AppState::new(
            engine.clone(),
            Arc::new(StaticHealth { healthy }),
            VERIFICATION_TOKEN,
            Arc::new(clock),
        );
        let router = create_router(state, Duration::from_secs(30));

        Self { router, engine, store, files }
    }

    /// Sends a request through the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("failed to make request")
    }

    /// Posts a notification carrying the verification token.
    pub async fn post_notification(&self, body: String) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/voicemail")
            .header("content-type", "application/json")
            .header("verification-token", VERIFICATION_TOKEN)
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Issues a bodiless request.
    pub async fn request(&self, method: &str, uri: &str) -> Response<Body> {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown(Duration::from_secs(5)).await.expect("engine should stop");
    }
}

/// Reads a response body as JSON.
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response should be valid JSON")
}
