//! Repository for transcribed voicemails.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{PayloadId, VoicemailRecord},
};

/// Repository for the `voicemail_transcriptions` table.
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

    /// Stores a voicemail linked to its raw payload.
    ///
    /// Rows are unique per external uuid. A second save for the same
    /// voicemail is a no-op and returns `false`.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn save(&self, payload_id: PayloadId, record: &VoicemailRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO voicemail_transcriptions (
                payload_id, external_uuid, call_date_time,
                from_phone_number, from_name, to_phone_number, to_name,
                transcription_text, audio_transcription_uri, audio_recording_uri
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (external_uuid) DO NOTHING
            "#,
        )
        .bind(payload_id.0)
        .bind(&record.external_uuid)
        .bind(record.call_date_time)
        .bind(&record.from_contact.phone_number)
        .bind(&record.from_contact.name)
        .bind(&record.to_contact.phone_number)
        .bind(&record.to_contact.name)
        .bind(&record.transcription_text)
        .bind(&record.audio_transcription_uri)
        .bind(&record.audio_recording_uri)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
