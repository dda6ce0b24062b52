//! Durable voicemail transcription workflow engine.
//!
//! This crate turns a voicemail notification into a stored transcription and
//! a row in the shared spreadsheet. Every run is a workflow instance whose
//! steps are checkpointed, so a crash or restart resumes where it stopped
//! instead of repeating side effects.
//!
//! # Architecture
//!
//! The engine spawns one task per instance. Each task drives the
//! [`VoicemailWorkflow`] through a [`checkpoint::WorkflowContext`]:
//!
//! 1. **ParsePayload** - decode and validate the notification
//! 2. **SavePayload** - persist the raw body for audit
//! 3. **ResolveAttachment** - poll for the transcription attachment
//! 4. **FetchTranscription** - download the transcription text
//! 5. **SaveTranscription** - persist the voicemail record
//! 6. **WriteToFile** - append a row to the shared spreadsheet
//!
//! # Key Features
//!
//! - **Durable Steps** - step outputs and timer fire times are checkpointed
//! - **Retry Policies** - per call class, rate-limit aware for the API
//! - **Cancellation** - per instance, and engine-wide on shutdown
//! - **Token Renewal** - JWT-bearer grant with refresh and a single replay on
//!   `401`
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use vmscribe_core::{CorrelationId, RealClock};
//! use vmscribe_workflow::{VoicemailWorkflow, WorkflowEngine, WorkflowError, storage::WorkflowStore};
//!
//! # async fn example(
//! #     store: Arc<dyn WorkflowStore>,
//! #     workflow: Arc<VoicemailWorkflow>,
//! # ) -> std::result::Result<(), WorkflowError> {
//! let engine = WorkflowEngine::new(store, workflow, Arc::new(RealClock::new()));
//!
//! let id = engine.start_workflow(&CorrelationId::generate(), "{}").await?;
//! engine.wait(id).await;
//! engine.shutdown(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attachment;
pub mod auth;
pub mod checkpoint;
pub mod client;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod retry;
pub mod shared_file;
pub mod storage;

// Re-export main public API
pub use attachment::RetrySchedule;
pub use auth::{Credentials, JwtCredentials, TokenProvider};
pub use client::{ClientConfig, MessageStoreClient};
pub use engine::{WorkflowEngine, WorkflowOutcome};
pub use error::{GatewayError, Result, WorkflowError};
pub use orchestrator::{VoicemailWorkflow, WorkflowDependencies};
pub use retry::{RetryPolicies, RetryPolicy};
pub use shared_file::{CsvSpreadsheetCodec, InMemoryFileGateway, LocalFileGateway, SharedFileCoordinator};
pub use storage::PostgresStore;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
