//! Repository for raw webhook payloads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{CorrelationId, PayloadId},
};

/// Source tag recorded with every stored payload.
pub const PAYLOAD_SOURCE: &str = "RingCentral";

/// Repository for the `webhook_payloads` table.
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

    /// Stores a raw payload and returns its id.
    ///
    /// Saving the same correlation id twice returns the id of the first row,
    /// so a redelivered webhook or a retried step never duplicates audit
    /// data.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn save(
        &self,
        correlation_id: &CorrelationId,
        payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<PayloadId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_payloads (correlation_id, payload, source, received_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (correlation_id)
            DO UPDATE SET correlation_id = EXCLUDED.correlation_id
            RETURNING id
            "#,
        )
        .bind(correlation_id.as_str())
        .bind(payload)
        .bind(PAYLOAD_SOURCE)
        .bind(received_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(PayloadId(id))
    }
}
