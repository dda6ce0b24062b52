//! Durable step execution through a checkpointed history.
//!
//! Every side-effecting step of a workflow runs through
//! [`WorkflowContext::step`]. The first execution stores the step's output
//! under the next position in the instance's history; a resumed execution
//! finds the stored output at the same position and returns it without
//! running the step again. Durable timers record their fire time the same
//! way, so a restarted instance only waits for what is left.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vmscribe_core::{
    models::{Checkpoint, CorrelationId, InstanceId},
    Clock,
};

use crate::{error::WorkflowError, storage::WorkflowStore};

/// Execution context of one workflow instance.
pub struct WorkflowContext {
    instance_id: InstanceId,
    correlation_id: CorrelationId,
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
    sequence: AtomicI32,
}

impl WorkflowContext {
    /// Creates a context positioned at the start of the history.
    pub fn new(
        instance_id: InstanceId,
        correlation_id: CorrelationId,
        store: Arc<dyn WorkflowStore>,
        clock: Arc<dyn Clock>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            instance_id,
            correlation_id,
            store,
            clock,
            cancellation,
            sequence: AtomicI32::new(0),
        }
    }

    /// Instance being executed.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Correlation id of the triggering event.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Clock used for timers and retry waits.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Cancellation token of this instance.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `WorkflowError::Cancelled` once cancellation was requested.
    pub fn ensure_not_cancelled(&self) -> Result<(), WorkflowError> {
        if self.cancellation.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        Ok(())
    }

    /// Records the state the instance is in.
    ///
    /// # Errors
    ///
    /// Returns error if the store update fails.
    pub async fn set_custom_status(&self, status: &str) -> Result<(), WorkflowError> {
        debug!(instance_id = %self.instance_id, status, "workflow status changed");
        self.store.set_custom_status(self.instance_id, status).await?;
        Ok(())
    }

    /// Runs a step at most once per history position.
    ///
    /// A failed step records nothing and runs again on the next execution.
    ///
    /// # Errors
    ///
    /// Returns the step's error, `WorkflowError::Cancelled`,
    /// `WorkflowError::NonDeterministic` when the history holds a different
    /// step at this position, or a store or serialization failure.
    pub async fn step<T, F, Fut>(&self, name: &str, operation: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        if let Some(checkpoint) = self.store.load_checkpoint(self.instance_id, sequence).await? {
            if checkpoint.step_name != name {
                return Err(WorkflowError::NonDeterministic {
                    sequence,
                    expected: name.to_string(),
                    found: checkpoint.step_name,
                });
            }

            debug!(instance_id = %self.instance_id, step = name, sequence, "replaying step");
            return Ok(serde_json::from_value(checkpoint.output)?);
        }

        self.ensure_not_cancelled()?;

        let output = tokio::select! {
            biased;
            () = self.cancellation.cancelled() => return Err(WorkflowError::Cancelled),
            output = operation() => output?,
        };

        let checkpoint = Checkpoint {
            instance_id: self.instance_id,
            sequence,
            step_name: name.to_string(),
            output: serde_json::to_value(&output)?,
            recorded_at: self.clock.now_utc(),
        };
        self.store.save_checkpoint(checkpoint).await?;

        debug!(instance_id = %self.instance_id, step = name, sequence, "step completed");
        Ok(output)
    }

    /// Sleeps for `delay` measured from the first time this timer ran.
    ///
    /// The fire time is checkpointed before waiting. On replay only the
    /// remaining time is waited, and nothing at all once it has passed.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::Cancelled` if cancelled while waiting.
    pub async fn sleep(&self, name: &str, delay: Duration) -> Result<(), WorkflowError> {
        let scheduled = self.clock.now_utc();
        let fire_at: DateTime<Utc> = self
            .step(name, || async move {
                let delay = chrono::Duration::from_std(delay).map_err(|e| {
                    WorkflowError::Checkpoint { message: format!("timer out of range: {e}") }
                })?;
                Ok(scheduled + delay)
            })
            .await?;

        let remaining = (fire_at - self.clock.now_utc()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return Ok(());
        }

        debug!(
            instance_id = %self.instance_id,
            timer = name,
            remaining_secs = remaining.as_secs_f64(),
            "waiting on durable timer"
        );

        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(WorkflowError::Cancelled),
            () = self.clock.sleep(remaining) => Ok(()),
        }
    }
}
