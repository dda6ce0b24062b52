//! Repository for workflow execution history.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Checkpoint, InstanceId},
};

/// Repository for the `workflow_checkpoints` table.
///
/// Rows are append-only and keyed by `(instance_id, sequence)`.
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

    /// Finds the checkpoint recorded at a position in the history.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find(&self, instance_id: InstanceId, sequence: i32) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(
            r#"
            SELECT instance_id, sequence, step_name, output, recorded_at
            FROM workflow_checkpoints
            WHERE instance_id = $1 AND sequence = $2
            "#,
        )
        .bind(instance_id)
        .bind(sequence)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(checkpoint)
    }

    /// Appends a checkpoint.
    ///
    /// A checkpoint already recorded at the same position wins.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert(&self, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (instance_id, sequence, step_name, output, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (instance_id, sequence) DO NOTHING
            "#,
        )
        .bind(checkpoint.instance_id)
        .bind(checkpoint.sequence)
        .bind(&checkpoint.step_name)
        .bind(&checkpoint.output)
        .bind(checkpoint.recorded_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
