//! Database access layer for payloads, voicemails and workflow history.
//!
//! Each table has a repository that translates between domain models and
//! rows. The workflow crate wraps these repositories behind its store traits,
//! so SQL stays in this module.

use std::sync::Arc;

use sqlx::PgPool;

pub mod checkpoints;
pub mod voicemails;
pub mod webhook_payloads;
pub mod workflow_instances;

use crate::error::Result;

/// Container for all repository instances sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Raw webhook payloads kept for audit.
    pub webhook_payloads: Arc<webhook_payloads::Repository>,

    /// Transcribed voicemails.
    pub voicemails: Arc<voicemails::Repository>,

    /// Workflow instance rows.
    pub workflow_instances: Arc<workflow_instances::Repository>,

    /// Execution history of workflow instances.
    pub checkpoints: Arc<checkpoints::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            webhook_payloads: Arc::new(webhook_payloads::Repository::new(pool.clone())),
            voicemails: Arc::new(voicemails::Repository::new(pool.clone())),
            workflow_instances: Arc::new(workflow_instances::Repository::new(pool.clone())),
            checkpoints: Arc::new(checkpoints::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) =
            sqlx::query_as("SELECT 1").fetch_one(&*self.webhook_payloads.pool()).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_can_be_created_without_connecting() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://localhost/vmscribe").unwrap();
        let storage = Storage::new(pool);

        assert!(Arc::ptr_eq(&storage.voicemails.pool(), &storage.checkpoints.pool()));
    }
}
