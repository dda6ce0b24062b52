//! Workflow engine running one task per instance.
//!
//! `start_workflow` persists an instance and hands it to a spawned task; the
//! HTTP caller gets the instance id back immediately and polls for the
//! result. Each instance runs inside its own inner task so a panic is
//! contained and recorded as an internal error instead of taking the engine
//! down.
//!
//! Cancellation comes in two kinds. `cancel` marks one instance Cancelled
//! for good. `shutdown` stops every task but leaves the instances Running,
//! and `recover` resumes them from their checkpoints on the next start.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vmscribe_core::{
    models::{CorrelationId, InstanceId, InstanceStatus, WorkflowInstance, WorkflowResult},
    Clock,
};

use crate::{
    checkpoint::WorkflowContext, error::WorkflowError, orchestrator::VoicemailWorkflow,
    storage::WorkflowStore,
};

/// Observable state of a workflow instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// Still running; carries the step it is in.
    Pending {
        /// Step name or polling attempt
        custom_status: String,
    },
    /// Finished with a result.
    Completed(WorkflowResult),
    /// Cancelled before finishing.
    Cancelled,
}

struct RunningInstance {
    cancellation: CancellationToken,
    finished: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<InstanceId, RunningInstance>>>;

/// Engine executing voicemail workflows.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    workflow: Arc<VoicemailWorkflow>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    running: Registry,
}

impl WorkflowEngine {
    /// Creates a new engine.
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        workflow: Arc<VoicemailWorkflow>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            workflow,
            clock,
            cancellation_token: CancellationToken::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedules a workflow for an event.
    ///
    /// Idempotent per correlation id: a redelivered event returns the id of
    /// the existing instance and does not start a second run.
    ///
    /// # Errors
    ///
    /// Returns a store failure if the instance cannot be persisted.
    pub async fn start_workflow(
        &self,
        correlation_id: &CorrelationId,
        raw_body: &str,
    ) -> Result<InstanceId, WorkflowError> {
        let instance = WorkflowInstance::new(correlation_id, raw_body, self.clock.now_utc());
        let (instance, created) = self.store.create_instance(instance).await?;

        if created {
            info!(
                correlation_id = %correlation_id,
                instance_id = %instance.id,
                "workflow scheduled"
            );
        } else {
            debug!(
                correlation_id = %correlation_id,
                instance_id = %instance.id,
                status = %instance.status,
                "workflow already exists for correlation id"
            );
        }

        let id = instance.id;
        if instance.status == InstanceStatus::Running {
            self.spawn(instance).await;
        }
        Ok(id)
    }

    /// Returns the state of an instance, or `None` if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub async fn workflow_result(
        &self,
        id: InstanceId,
    ) -> Result<Option<WorkflowOutcome>, WorkflowError> {
        let Some(instance) = self.store.find_instance(id).await? else {
            return Ok(None);
        };

        let outcome = match instance.status {
            InstanceStatus::Running => {
                WorkflowOutcome::Pending { custom_status: instance.custom_status }
            },
            InstanceStatus::Completed => WorkflowOutcome::Completed(
                instance
                    .result
                    .map(|json| json.0)
                    .unwrap_or_else(|| WorkflowResult::error(WorkflowResult::INTERNAL_ERROR)),
            ),
            InstanceStatus::Cancelled => WorkflowOutcome::Cancelled,
        };
        Ok(Some(outcome))
    }

    /// Cancels a running instance.
    ///
    /// Returns false if the instance is unknown or already terminal.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub async fn cancel(&self, id: InstanceId) -> Result<bool, WorkflowError> {
        let cancelled = self.store.mark_cancelled(id).await?;

        if let Some(running) = self.running.lock().await.get(&id) {
            running.cancellation.cancel();
        }

        if cancelled {
            info!(instance_id = %id, "workflow cancelled");
        }
        Ok(cancelled)
    }

    /// Resumes every instance left running by a previous process.
    ///
    /// Returns the number of instances resumed.
    ///
    /// # Errors
    ///
    /// Returns a store failure.
    pub async fn recover(&self) -> Result<usize, WorkflowError> {
        let unfinished = self.store.list_unfinished().await?;
        let mut resumed = 0;

        for instance in unfinished {
            if self.spawn(instance).await {
                resumed += 1;
            }
        }

        if resumed > 0 {
            info!(resumed, "resumed unfinished workflows");
        }
        Ok(resumed)
    }

    /// Waits until the task of an instance has finished.
    ///
    /// Returns immediately if the instance is not running in this engine.
    pub async fn wait(&self, id: InstanceId) {
        let finished = self.running.lock().await.get(&id).map(|r| r.finished.clone());

        if let Some(mut finished) = finished {
            let _ = finished.wait_for(|done| *done).await;
        }
    }

    /// Number of instances running in this engine.
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Stops every running instance and waits up to `timeout` for the tasks
    /// to exit.
    ///
    /// Instances stay Running in the store and are resumed by `recover`.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::ShutdownTimeout` if tasks did not stop in
    /// time.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), WorkflowError> {
        self.cancellation_token.cancel();

        let handles: Vec<JoinHandle<()>> =
            self.running.lock().await.drain().map(|(_, running)| running.handle).collect();

        info!(
            running = handles.len(),
            timeout_seconds = timeout.as_secs(),
            "shutting down workflow engine"
        );

        let drain = async {
            for handle in handles {
                if let Err(join_error) = handle.await {
                    warn!(error = %join_error, "workflow task ended abnormally during shutdown");
                }
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                info!("workflow engine shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "workflow shutdown timed out, some instances may still be running"
                );
                Err(WorkflowError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Starts a task for `instance` unless one is already running.
    async fn spawn(&self, instance: WorkflowInstance) -> bool {
        if self.cancellation_token.is_cancelled() {
            warn!(instance_id = %instance.id, "engine is shutting down, not starting workflow");
            return false;
        }

        let mut running = self.running.lock().await;
        if running.contains_key(&instance.id) {
            return false;
        }

        let cancellation = self.cancellation_token.child_token();
        let (finished_tx, finished_rx) = watch::channel(false);
        let ctx = WorkflowContext::new(
            instance.id,
            instance.correlation(),
            self.store.clone(),
            self.clock.clone(),
            cancellation.clone(),
        );

        let handle = tokio::spawn(run_instance(
            ctx,
            instance.raw_body,
            self.workflow.clone(),
            self.store.clone(),
            self.running.clone(),
            finished_tx,
        ));

        running.insert(instance.id, RunningInstance { cancellation, finished: finished_rx, handle });
        true
    }
}

async fn run_instance(
    ctx: WorkflowContext,
    raw_body: String,
    workflow: Arc<VoicemailWorkflow>,
    store: Arc<dyn WorkflowStore>,
    running: Registry,
    finished: watch::Sender<bool>,
) {
    let instance_id = ctx.instance_id();
    let correlation_id = ctx.correlation_id().clone();

    let task = tokio::spawn(async move { workflow.run(&ctx, &raw_body).await });

    let result = match task.await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(err)) if err.is_cancelled() => {
            info!(
                correlation_id = %correlation_id,
                instance_id = %instance_id,
                "workflow stopped by cancellation"
            );
            None
        },
        Ok(Err(err)) => {
            error!(
                correlation_id = %correlation_id,
                instance_id = %instance_id,
                error = %err,
                "workflow failed"
            );
            Some(WorkflowResult::error(WorkflowResult::INTERNAL_ERROR))
        },
        Err(join_error) if join_error.is_panic() => {
            error!(
                correlation_id = %correlation_id,
                instance_id = %instance_id,
                "workflow task panicked"
            );
            Some(WorkflowResult::error(WorkflowResult::INTERNAL_ERROR))
        },
        Err(_) => None,
    };

    if let Some(result) = result {
        match store.complete_instance(instance_id, &result).await {
            Ok(()) => info!(
                correlation_id = %correlation_id,
                instance_id = %instance_id,
                success = result.is_success(),
                message = %result.message,
                "workflow completed"
            ),
            Err(err) => error!(
                correlation_id = %correlation_id,
                instance_id = %instance_id,
                error = %err,
                "failed to record workflow result"
            ),
        }
    }

    running.lock().await.remove(&instance_id);
    finished.send_replace(true);
}
