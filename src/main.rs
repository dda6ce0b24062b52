//! vmscribe voicemail transcription service.
//!
//! Main entry point. Initializes all subsystems, resumes unfinished
//! workflows and coordinates graceful startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use vmscribe_api::{AppState, Config};
use vmscribe_core::{Clock, RealClock, Storage};
use vmscribe_workflow::{
    CsvSpreadsheetCodec, LocalFileGateway, MessageStoreClient, PostgresStore,
    SharedFileCoordinator, VoicemailWorkflow, WorkflowDependencies, WorkflowEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.rust_log);

    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        max_connections = config.database_max_connections,
        api_base_url = %config.api_base_url,
        spreadsheet = %config.spreadsheet_file_name,
        "configuration loaded"
    );
    if config.uses_jwt_authorization() {
        info!("message store requests authorize with the JWT-bearer grant");
    } else {
        warn!("API_JWT is not set, using the static API_ACCESS_TOKEN without renewal");
    }
    if config.webhook_verification_token.is_empty() {
        warn!("WEBHOOK_VERIFICATION_TOKEN is not set, notifications are accepted unverified");
    }

    let db_pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    run_migrations(&db_pool).await?;
    info!("database migrations completed");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let storage = Arc::new(Storage::new(db_pool.clone()));
    let store = Arc::new(PostgresStore::new(storage.clone(), clock.clone()));
    let client = Arc::new(
        MessageStoreClient::with_clock(config.to_client_config(), clock.clone())
            .context("Failed to create message store client")?,
    );
    let policies = config.to_retry_policies();

    let shared_file = SharedFileCoordinator::new(
        Arc::new(LocalFileGateway::new(&config.file_store_path)),
        Arc::new(CsvSpreadsheetCodec::new()),
        policies.file.clone(),
        &config.file_root_directory,
        &config.spreadsheet_file_name,
    );
    let workflow = Arc::new(VoicemailWorkflow::new(
        WorkflowDependencies {
            messages: client.clone(),
            transcriptions: client,
            payloads: store.clone(),
            voicemails: store.clone(),
            shared_file: Arc::new(shared_file),
        },
        policies,
        config.to_retry_schedule(),
    ));
    let engine = Arc::new(WorkflowEngine::new(store, workflow, clock.clone()));

    let resumed = engine.recover().await.context("Failed to resume unfinished workflows")?;
    info!(resumed, "unfinished workflows resumed");

    let state =
        AppState::new(engine.clone(), storage, config.webhook_verification_token.as_str(), clock);
    let addr = config.parse_server_addr()?;
    let request_timeout = Duration::from_secs(config.request_timeout);

    info!(addr = %addr, "vmscribe is ready to receive notifications");

    if let Err(e) =
        vmscribe_api::start_server(state, addr, request_timeout, vmscribe_api::shutdown_signal())
            .await
    {
        error!(error = %e, "server failed");
    }

    if let Err(e) = engine.shutdown(config.shutdown_timeout()).await {
        error!(error = %e, "workflow engine did not stop cleanly");
    }

    db_pool.close().await;
    info!("database connections closed");

    info!("vmscribe shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` from the environment over the
/// configured level, and logs the startup banner.
fn init_tracing(default_level: &str) {
    use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{default_level},vmscribe=debug,tower_http=debug")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    log_subscriber(filter, std::io::stdout).init();
    startup_banner();
}

fn log_subscriber<W>(
    filter: tracing_subscriber::EnvFilter,
    writer: W,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::{fmt, layer::SubscriberExt};

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer)
}

fn startup_banner() {
    info!(version = env!("CARGO_PKG_VERSION"), "starting vmscribe voicemail transcription service");
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(config.database_idle_timeout))
            .max_lifetime(Duration::from_secs(config.database_max_lifetime))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Creates the tables used by the repositories.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_payloads (
            id BIGSERIAL PRIMARY KEY,
            correlation_id TEXT NOT NULL UNIQUE,
            payload TEXT NOT NULL,
            source TEXT NOT NULL,
            received_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create webhook_payloads table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voicemail_transcriptions (
            id BIGSERIAL PRIMARY KEY,
            payload_id BIGINT NOT NULL REFERENCES webhook_payloads(id),
            external_uuid TEXT NOT NULL UNIQUE,
            call_date_time TIMESTAMPTZ NOT NULL,
            from_phone_number TEXT NOT NULL,
            from_name TEXT NOT NULL,
            to_phone_number TEXT NOT NULL,
            to_name TEXT NOT NULL,
            transcription_text TEXT NOT NULL,
            audio_transcription_uri TEXT,
            audio_recording_uri TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create voicemail_transcriptions table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_instances (
            id UUID PRIMARY KEY,
            correlation_id TEXT NOT NULL UNIQUE,
            raw_body TEXT NOT NULL,
            status TEXT NOT NULL,
            custom_status TEXT NOT NULL,
            result JSONB,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create workflow_instances table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_checkpoints (
            instance_id UUID NOT NULL REFERENCES workflow_instances(id),
            sequence INTEGER NOT NULL,
            step_name TEXT NOT NULL,
            output JSONB NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (instance_id, sequence)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create workflow_checkpoints table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_workflow_instances_status
        ON workflow_instances(status, created_at)
        WHERE status = 'running'
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create workflow_instances status index")?;

    Ok(())
}
