//! vmscribe HTTP API.
//!
//! Receives voicemail notifications, hands them to the workflow engine and
//! exposes workflow status, cancellation and health endpoints.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use vmscribe_core::Clock;
use vmscribe_workflow::WorkflowEngine;

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use handlers::health::DatabaseHealth;
pub use server::{create_router, shutdown_signal, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Engine running voicemail workflows.
    pub engine: Arc<WorkflowEngine>,
    /// Database connectivity check used by `/health`.
    pub database: Arc<dyn DatabaseHealth>,
    /// Secret expected in the `verification-token` header. Empty disables
    /// the check.
    pub verification_token: Arc<str>,
    /// Clock for health timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates application state.
    pub fn new(
        engine: Arc<WorkflowEngine>,
        database: Arc<dyn DatabaseHealth>,
        verification_token: impl Into<Arc<str>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { engine, database, verification_token: verification_token.into(), clock }
    }
}
