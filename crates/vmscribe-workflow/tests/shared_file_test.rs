//! Integration tests for appending to the shared spreadsheet.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vmscribe_core::{models::TranscriptionEntry, CorrelationId, TestClock};
use vmscribe_workflow::{
    gateway::FileGateway, CsvSpreadsheetCodec, GatewayError, InMemoryFileGateway,
    LocalFileGateway, RetryPolicy, SharedFileCoordinator,
};

fn entry(uuid: &str, transcription: &str) -> TranscriptionEntry {
    TranscriptionEntry {
        uuid: uuid.to_string(),
        creation_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap(),
        from_phone_number: "+15551230001".to_string(),
        to_phone_number: "+15551230002".to_string(),
        transcription: transcription.to_string(),
    }
}

fn coordinator(files: Arc<dyn FileGateway>) -> SharedFileCoordinator {
    SharedFileCoordinator::new(
        files,
        Arc::new(CsvSpreadsheetCodec::new()),
        RetryPolicy::file(),
        "/shared",
        "voicemails.csv",
    )
}

async fn append(
    coordinator: &SharedFileCoordinator,
    clock: &TestClock,
    entry: &TranscriptionEntry,
) -> vmscribe_workflow::Result<()> {
    coordinator
        .append_entry(entry, clock, &CancellationToken::new(), &CorrelationId::new(&entry.uuid))
        .await
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("vmscribe-shared-{}", Uuid::new_v4()))
}

#[tokio::test]
async fn first_entry_creates_file_with_header() -> Result<()> {
    let files = InMemoryFileGateway::new();
    let coordinator = coordinator(Arc::new(files.clone()));
    let clock = TestClock::new();

    append(&coordinator, &clock, &entry("a1", "First message")).await?;

    let content = String::from_utf8(files.get("/shared/voicemails.csv").await.unwrap().to_vec())?;
    assert_eq!(
        content,
        "UUID,Created At,From,To,Transcription\na1,03/01/2024 01:05,+15551230001,+15551230002,First message\n"
    );
    Ok(())
}

#[tokio::test]
async fn later_entries_are_appended_in_order() -> Result<()> {
    let files = InMemoryFileGateway::new();
    let coordinator = coordinator(Arc::new(files.clone()));
    let clock = TestClock::new();

    append(&coordinator, &clock, &entry("a1", "First")).await?;
    append(&coordinator, &clock, &entry("a2", "Second, with a comma")).await?;
    append(&coordinator, &clock, &entry("a3", "Third")).await?;

    let content = String::from_utf8(files.get("/shared/voicemails.csv").await.unwrap().to_vec())?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].starts_with("a1,"));
    assert!(lines[2].ends_with("\"Second, with a comma\""));
    assert!(lines[3].starts_with("a3,"));
    Ok(())
}

#[tokio::test]
async fn failed_existence_check_recreates_file() -> Result<()> {
    let files = InMemoryFileGateway::new();
    files.put("/shared/voicemails.csv", "UUID,Created At,From,To,Transcription\nold,row,,,x\n").await;
    files.inject_exists_failures(1);
    let coordinator = coordinator(Arc::new(files.clone()));

    append(&coordinator, &TestClock::new(), &entry("a1", "Fresh")).await?;

    let content = String::from_utf8(files.get("/shared/voicemails.csv").await.unwrap().to_vec())?;
    assert_eq!(content.lines().count(), 2);
    assert!(!content.contains("old,row"));
    Ok(())
}

#[tokio::test]
async fn upload_is_retried_with_backoff() -> Result<()> {
    let files = InMemoryFileGateway::new();
    files.inject_upload_failures(2);
    let coordinator = coordinator(Arc::new(files.clone()));
    let clock = TestClock::new();

    append(&coordinator, &clock, &entry("a1", "Eventually")).await?;

    assert_eq!(files.upload_count(), 3);
    assert_eq!(
        clock.recorded_sleeps(),
        vec![std::time::Duration::from_secs(2), std::time::Duration::from_secs(4)]
    );
    Ok(())
}

#[tokio::test]
async fn upload_gives_up_after_retries() {
    let files = InMemoryFileGateway::new();
    files.inject_upload_failures(100);
    let coordinator = coordinator(Arc::new(files.clone()));

    let result = append(&coordinator, &TestClock::new(), &entry("a1", "Never")).await;

    assert!(matches!(result, Err(GatewayError::Transfer { .. })));
    assert_eq!(files.upload_count(), 4);
}

#[tokio::test]
async fn local_gateway_creates_directories_and_appends() -> Result<()> {
    let root = scratch_dir();
    let coordinator = coordinator(Arc::new(LocalFileGateway::new(&root)));
    let clock = TestClock::new();

    append(&coordinator, &clock, &entry("a1", "On disk")).await?;
    append(&coordinator, &clock, &entry("a2", "Also on disk")).await?;

    let content = tokio::fs::read_to_string(root.join("shared/voicemails.csv")).await?;
    assert_eq!(content.lines().count(), 3);
    assert!(content.contains("a2,03/01/2024 01:05"));

    tokio::fs::remove_dir_all(&root).await?;
    Ok(())
}

#[tokio::test]
async fn local_gateway_reports_missing_file_as_access_denied() -> Result<()> {
    let root = scratch_dir();
    let files = LocalFileGateway::new(&root);

    assert!(!files.exists("/shared/missing.csv").await?);
    let err = files.download("/shared/missing.csv").await.unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Transfer { kind: vmscribe_workflow::error::TransferFailure::AccessDenied, .. }
    ));
    Ok(())
}
