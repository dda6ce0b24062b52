//! Storage abstraction layer for the workflow.
//!
//! Provides trait-based abstractions over persistence so the orchestrator
//! and engine can be tested without a database. Production code uses
//! [`PostgresStore`], which wraps `vmscribe_core::storage::Storage`; tests
//! use [`mock::MockStore`].

use std::{future::Future, pin::Pin, sync::Arc};

use vmscribe_core::{
    error::Result,
    models::{
        Checkpoint, CorrelationId, InstanceId, PayloadId, VoicemailRecord, WorkflowInstance,
        WorkflowResult,
    },
    storage::Storage,
    Clock,
};

/// Audit store for raw webhook bodies.
pub trait PayloadStore: Send + Sync + 'static {
    /// Persists a raw body and returns its id.
    ///
    /// Idempotent per correlation id: repeated saves return the first id.
    fn save_raw_payload<'a>(
        &'a self,
        correlation_id: &'a CorrelationId,
        raw_body: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<PayloadId>> + Send + 'a>>;
}

/// Store for transcribed voicemails.
pub trait VoicemailStore: Send + Sync + 'static {
    /// Persists a voicemail linked to its raw payload.
    ///
    /// Idempotent per external uuid. Returns `false` when the voicemail was
    /// already stored.
    fn save_transcription<'a>(
        &'a self,
        payload_id: PayloadId,
        record: &'a VoicemailRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

/// Store for workflow instances and their execution history.
pub trait WorkflowStore: Send + Sync + 'static {
    /// Inserts an instance unless one exists for its correlation id.
    ///
    /// Returns the stored instance and whether this call created it.
    fn create_instance(
        &self,
        instance: WorkflowInstance,
    ) -> Pin<Box<dyn Future<Output = Result<(WorkflowInstance, bool)>> + Send + '_>>;

    /// Finds an instance by id.
    fn find_instance(
        &self,
        id: InstanceId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WorkflowInstance>>> + Send + '_>>;

    /// Lists running instances, oldest first.
    fn list_unfinished(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WorkflowInstance>>> + Send + '_>>;

    /// Records the step an instance is executing.
    fn set_custom_status<'a>(
        &'a self,
        id: InstanceId,
        custom_status: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Records the terminal result. Has no effect unless the instance is
    /// running.
    fn complete_instance<'a>(
        &'a self,
        id: InstanceId,
        result: &'a WorkflowResult,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Marks a running instance as cancelled. Returns false if it was not
    /// running.
    fn mark_cancelled(
        &self,
        id: InstanceId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Loads the checkpoint recorded at `sequence`.
    fn load_checkpoint(
        &self,
        id: InstanceId,
        sequence: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>>> + Send + '_>>;

    /// Appends a checkpoint.
    fn save_checkpoint(
        &self,
        checkpoint: Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production store implementation using PostgreSQL.
///
/// Implements every store trait over one `Storage` container. Timestamps
/// come from the injected clock.
pub struct PostgresStore {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }
}

impl PayloadStore for PostgresStore {
    fn save_raw_payload<'a>(
        &'a self,
        correlation_id: &'a CorrelationId,
        raw_body: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<PayloadId>> + Send + 'a>> {
        let now = self.clock.now_utc();
        Box::pin(self.storage.webhook_payloads.save(correlation_id, raw_body, now))
    }
}

impl VoicemailStore for PostgresStore {
    fn save_transcription<'a>(
        &'a self,
        payload_id: PayloadId,
        record: &'a VoicemailRecord,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(self.storage.voicemails.save(payload_id, record))
    }
}

impl WorkflowStore for PostgresStore {
    fn create_instance(
        &self,
        instance: WorkflowInstance,
    ) -> Pin<Box<dyn Future<Output = Result<(WorkflowInstance, bool)>> + Send + '_>> {
        Box::pin(async move { self.storage.workflow_instances.create_or_find(&instance).await })
    }

    fn find_instance(
        &self,
        id: InstanceId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WorkflowInstance>>> + Send + '_>> {
        Box::pin(self.storage.workflow_instances.find_by_id(id))
    }

    fn list_unfinished(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<WorkflowInstance>>> + Send + '_>> {
        Box::pin(self.storage.workflow_instances.find_unfinished())
    }

    fn set_custom_status<'a>(
        &'a self,
        id: InstanceId,
        custom_status: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let now = self.clock.now_utc();
        Box::pin(self.storage.workflow_instances.update_custom_status(id, custom_status, now))
    }

    fn complete_instance<'a>(
        &'a self,
        id: InstanceId,
        result: &'a WorkflowResult,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let now = self.clock.now_utc();
        Box::pin(self.storage.workflow_instances.complete(id, result, now))
    }

    fn mark_cancelled(
        &self,
        id: InstanceId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let now = self.clock.now_utc();
        Box::pin(self.storage.workflow_instances.cancel(id, now))
    }

    fn load_checkpoint(
        &self,
        id: InstanceId,
        sequence: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>>> + Send + '_>> {
        Box::pin(self.storage.checkpoints.find(id, sequence))
    }

    fn save_checkpoint(
        &self,
        checkpoint: Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.storage.checkpoints.insert(&checkpoint).await })
    }
}

pub mod mock {
    //! Mock storage implementation for testing.
    //!
    //! Keeps every table in memory. Supports injecting failures into the
    //! payload and voicemail saves and inspecting everything written.

    use std::{
        collections::{BTreeMap, HashMap},
        future::Future,
        pin::Pin,
        sync::Arc,
    };

    use tokio::sync::RwLock;
    use vmscribe_core::{
        error::{CoreError, Result},
        models::{
            Checkpoint, CorrelationId, InstanceId, InstanceStatus, PayloadId, VoicemailRecord,
            WorkflowInstance, WorkflowResult,
        },
        Clock, RealClock,
    };

    use super::{PayloadStore, VoicemailStore, WorkflowStore};

    /// In-memory store implementing every store trait.
    #[derive(Clone)]
    pub struct MockStore {
        clock: Arc<dyn Clock>,
        payloads: Arc<RwLock<Vec<(CorrelationId, String)>>>,
        voicemails: Arc<RwLock<HashMap<String, (PayloadId, VoicemailRecord)>>>,
        instances: Arc<RwLock<HashMap<InstanceId, WorkflowInstance>>>,
        checkpoints: Arc<RwLock<BTreeMap<(InstanceId, i32), Checkpoint>>>,
        payload_errors: Arc<RwLock<Vec<CoreError>>>,
        voicemail_errors: Arc<RwLock<Vec<CoreError>>>,
        payload_save_calls: Arc<RwLock<usize>>,
    }

    impl MockStore {
        /// Creates an empty store using the real clock for timestamps.
        pub fn new() -> Self {
            Self::with_clock(Arc::new(RealClock::new()))
        }

        /// Creates an empty store using `clock` for timestamps.
        pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
            Self {
                clock,
                payloads: Arc::default(),
                voicemails: Arc::default(),
                instances: Arc::default(),
                checkpoints: Arc::default(),
                payload_errors: Arc::default(),
                voicemail_errors: Arc::default(),
                payload_save_calls: Arc::default(),
            }
        }

        /// Makes the next `count` payload saves fail with `error`.
        pub async fn inject_payload_errors(&self, count: usize, error: CoreError) {
            self.payload_errors.write().await.extend(std::iter::repeat(error).take(count));
        }

        /// Makes the next `count` voicemail saves fail with `error`.
        pub async fn inject_voicemail_errors(&self, count: usize, error: CoreError) {
            self.voicemail_errors.write().await.extend(std::iter::repeat(error).take(count));
        }

        /// Stored raw payloads in insertion order.
        pub async fn recorded_payloads(&self) -> Vec<(CorrelationId, String)> {
            self.payloads.read().await.clone()
        }

        /// Number of payload save calls, including failed ones.
        pub async fn payload_save_calls(&self) -> usize {
            *self.payload_save_calls.read().await
        }

        /// Stored voicemails.
        pub async fn recorded_voicemails(&self) -> Vec<(PayloadId, VoicemailRecord)> {
            self.voicemails.read().await.values().cloned().collect()
        }

        /// Execution history of an instance in order.
        pub async fn recorded_checkpoints(&self, id: InstanceId) -> Vec<Checkpoint> {
            self.checkpoints
                .read()
                .await
                .range((id, i32::MIN)..=(id, i32::MAX))
                .map(|(_, checkpoint)| checkpoint.clone())
                .collect()
        }

        /// Inserts a checkpoint directly, as if recorded by an earlier run.
        pub async fn seed_checkpoint(&self, checkpoint: Checkpoint) {
            self.checkpoints
                .write()
                .await
                .insert((checkpoint.instance_id, checkpoint.sequence), checkpoint);
        }

        /// Current state of an instance.
        pub async fn instance(&self, id: InstanceId) -> Option<WorkflowInstance> {
            self.instances.read().await.get(&id).cloned()
        }

        async fn take_error(errors: &RwLock<Vec<CoreError>>) -> Option<CoreError> {
            let mut errors = errors.write().await;
            if errors.is_empty() {
                None
            } else {
                Some(errors.remove(0))
            }
        }
    }

    impl Default for MockStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PayloadStore for MockStore {
        fn save_raw_payload<'a>(
            &'a self,
            correlation_id: &'a CorrelationId,
            raw_body: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<PayloadId>> + Send + 'a>> {
            Box::pin(async move {
                *self.payload_save_calls.write().await += 1;
                if let Some(error) = Self::take_error(&self.payload_errors).await {
                    return Err(error);
                }

                let mut payloads = self.payloads.write().await;
                if let Some(index) = payloads.iter().position(|(id, _)| id == correlation_id) {
                    return Ok(PayloadId(index as i64 + 1));
                }
                payloads.push((correlation_id.clone(), raw_body.to_string()));
                Ok(PayloadId(payloads.len() as i64))
            })
        }
    }

    impl VoicemailStore for MockStore {
        fn save_transcription<'a>(
            &'a self,
            payload_id: PayloadId,
            record: &'a VoicemailRecord,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
            Box::pin(async move {
                if let Some(error) = Self::take_error(&self.voicemail_errors).await {
                    return Err(error);
                }

                let mut voicemails = self.voicemails.write().await;
                if voicemails.contains_key(&record.external_uuid) {
                    return Ok(false);
                }
                voicemails.insert(record.external_uuid.clone(), (payload_id, record.clone()));
                Ok(true)
            })
        }
    }

    impl WorkflowStore for MockStore {
        fn create_instance(
            &self,
            instance: WorkflowInstance,
        ) -> Pin<Box<dyn Future<Output = Result<(WorkflowInstance, bool)>> + Send + '_>> {
            Box::pin(async move {
                let mut instances = self.instances.write().await;
                if let Some(existing) =
                    instances.values().find(|i| i.correlation_id == instance.correlation_id)
                {
                    return Ok((existing.clone(), false));
                }
                instances.insert(instance.id, instance.clone());
                Ok((instance, true))
            })
        }

        fn find_instance(
            &self,
            id: InstanceId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<WorkflowInstance>>> + Send + '_>> {
            Box::pin(async move { Ok(self.instances.read().await.get(&id).cloned()) })
        }

        fn list_unfinished(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<WorkflowInstance>>> + Send + '_>> {
            Box::pin(async move {
                let mut unfinished: Vec<WorkflowInstance> = self
                    .instances
                    .read()
                    .await
                    .values()
                    .filter(|i| i.status == InstanceStatus::Running)
                    .cloned()
                    .collect();
                unfinished.sort_by_key(|i| i.created_at);
                Ok(unfinished)
            })
        }

        fn set_custom_status<'a>(
            &'a self,
            id: InstanceId,
            custom_status: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                if let Some(instance) = self.instances.write().await.get_mut(&id) {
                    instance.custom_status = custom_status.to_string();
                    instance.updated_at = self.clock.now_utc();
                }
                Ok(())
            })
        }

        fn complete_instance<'a>(
            &'a self,
            id: InstanceId,
            result: &'a WorkflowResult,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                if let Some(instance) = self.instances.write().await.get_mut(&id) {
                    if instance.status == InstanceStatus::Running {
                        instance.status = InstanceStatus::Completed;
                        instance.result = Some(sqlx::types::Json(result.clone()));
                        instance.updated_at = self.clock.now_utc();
                    }
                }
                Ok(())
            })
        }

        fn mark_cancelled(
            &self,
            id: InstanceId,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
            Box::pin(async move {
                match self.instances.write().await.get_mut(&id) {
                    Some(instance) if instance.status == InstanceStatus::Running => {
                        instance.status = InstanceStatus::Cancelled;
                        instance.custom_status = "Cancelled".to_string();
                        instance.updated_at = self.clock.now_utc();
                        Ok(true)
                    },
                    _ => Ok(false),
                }
            })
        }

        fn load_checkpoint(
            &self,
            id: InstanceId,
            sequence: i32,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Checkpoint>>> + Send + '_>> {
            Box::pin(async move { Ok(self.checkpoints.read().await.get(&(id, sequence)).cloned()) })
        }

        fn save_checkpoint(
            &self,
            checkpoint: Checkpoint,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                self.checkpoints
                    .write()
                    .await
                    .entry((checkpoint.instance_id, checkpoint.sequence))
                    .or_insert(checkpoint);
                Ok(())
            })
        }
    }
}
