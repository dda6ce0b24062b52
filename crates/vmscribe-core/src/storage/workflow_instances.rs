//! Repository for workflow instance rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};

use crate::{
    error::Result,
    models::{InstanceId, InstanceStatus, WorkflowInstance, WorkflowResult},
};

const INSTANCE_COLUMNS: &str =
    "id, correlation_id, raw_body, status, custom_status, result, created_at, updated_at";

/// Repository for the `workflow_instances` table.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts an instance unless one exists for its correlation id.
    ///
    /// Returns the stored instance and whether it was created by this call.
    ///
    /// # Errors
    ///
    /// Returns error if the insert or lookup fails.
    pub async fn create_or_find(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<(WorkflowInstance, bool)> {
        let inserted = sqlx::query_as::<_, WorkflowInstance>(&format!(
            r#"
            INSERT INTO workflow_instances (
                id, correlation_id, raw_body, status, custom_status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (correlation_id) DO NOTHING
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(instance.id)
        .bind(&instance.correlation_id)
        .bind(&instance.raw_body)
        .bind(instance.status.to_string())
        .bind(&instance.custom_status)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .fetch_optional(&*self.pool)
        .await?;

        if let Some(created) = inserted {
            return Ok((created, true));
        }

        let existing = sqlx::query_as::<_, WorkflowInstance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE correlation_id = $1"
        ))
        .bind(&instance.correlation_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok((existing, false))
    }

    /// Finds an instance by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: InstanceId) -> Result<Option<WorkflowInstance>> {
        let instance = sqlx::query_as::<_, WorkflowInstance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(instance)
    }

    /// Lists instances that have not reached a terminal state, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_unfinished(&self) -> Result<Vec<WorkflowInstance>> {
        let instances = sqlx::query_as::<_, WorkflowInstance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(InstanceStatus::Running.to_string())
        .fetch_all(&*self.pool)
        .await?;

        Ok(instances)
    }

    /// Records the step an instance is executing.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_custom_status(
        &self,
        id: InstanceId,
        custom_status: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE workflow_instances SET custom_status = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(custom_status)
        .bind(now)
        .bind(id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Records the terminal result of a running instance.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn complete(
        &self,
        id: InstanceId,
        result: &WorkflowResult,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_instances
            SET status = $1, result = $2, updated_at = $3
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(InstanceStatus::Completed.to_string())
        .bind(Json(result))
        .bind(now)
        .bind(id)
        .bind(InstanceStatus::Running.to_string())
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks a running instance as cancelled.
    ///
    /// Returns false if the instance was already terminal or does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn cancel(&self, id: InstanceId, now: DateTime<Utc>) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET status = $1, custom_status = 'Cancelled', updated_at = $2
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(InstanceStatus::Cancelled.to_string())
        .bind(now)
        .bind(id)
        .bind(InstanceStatus::Running.to_string())
        .execute(&*self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }
}
