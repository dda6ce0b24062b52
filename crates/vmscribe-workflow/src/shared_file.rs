//! Appending transcription rows to the shared spreadsheet.
//!
//! The coordinator downloads the current file, appends a row and uploads it
//! back with overwrite. There is no lock around this read-modify-write: two
//! instances appending at the same moment can lose one row.

use std::{
    collections::HashMap,
    future::Future,
    io,
    path::PathBuf,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vmscribe_core::{models::TranscriptionEntry, Clock, CorrelationId};

use crate::{
    error::{GatewayError, Result, TransferFailure},
    gateway::{FileGateway, SpreadsheetCodec, TransferStatus},
    retry::RetryPolicy,
};

/// Header row of the shared spreadsheet.
pub const HEADER: [&str; 5] = ["UUID", "Created At", "From", "To", "Transcription"];

/// Format of the `Created At` column.
pub const CREATED_AT_FORMAT: &str = "%m/%d/%Y %H:%M";

/// Time zone the `Created At` column is rendered in.
pub const CREATED_AT_TIME_ZONE: Tz = chrono_tz::America::Los_Angeles;

/// Renders a UTC instant as Pacific wall-clock time, PST or PDT as in effect.
pub fn format_created_at(time: DateTime<Utc>) -> String {
    time.with_timezone(&CREATED_AT_TIME_ZONE).format(CREATED_AT_FORMAT).to_string()
}

/// Joins a root directory and a file name into a remote path.
pub fn remote_path(root_directory: &str, file_name: &str) -> String {
    format!("{}/{}", root_directory.trim_end_matches('/'), file_name.trim_start_matches('/'))
}

/// Appends entries to one shared spreadsheet.
pub struct SharedFileCoordinator {
    files: Arc<dyn FileGateway>,
    codec: Arc<dyn SpreadsheetCodec>,
    policy: RetryPolicy,
    path: String,
}

impl SharedFileCoordinator {
    /// Creates a coordinator for `file_name` under `root_directory`.
    pub fn new(
        files: Arc<dyn FileGateway>,
        codec: Arc<dyn SpreadsheetCodec>,
        policy: RetryPolicy,
        root_directory: &str,
        file_name: &str,
    ) -> Self {
        Self { files, codec, policy, path: remote_path(root_directory, file_name) }
    }

    /// Remote path of the spreadsheet.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Appends `entry`, creating the file if it does not exist.
    ///
    /// A failing existence check is treated as a missing file.
    ///
    /// # Errors
    ///
    /// Returns the download, encoding or upload failure.
    pub async fn append_entry(
        &self,
        entry: &TranscriptionEntry,
        clock: &dyn Clock,
        cancellation: &CancellationToken,
        correlation_id: &CorrelationId,
    ) -> Result<()> {
        let exists = match self.files.exists(&self.path).await {
            Ok(exists) => exists,
            Err(error) => {
                warn!(
                    correlation_id = %correlation_id,
                    path = %self.path,
                    error = %error,
                    "existence check failed, treating file as missing"
                );
                false
            },
        };

        self.write_entry(exists, entry, clock, cancellation, correlation_id).await
    }

    /// Writes `entry` into a new file or appends it to the existing one.
    ///
    /// # Errors
    ///
    /// Returns the download, encoding or upload failure.
    pub async fn write_entry(
        &self,
        exists: bool,
        entry: &TranscriptionEntry,
        clock: &dyn Clock,
        cancellation: &CancellationToken,
        correlation_id: &CorrelationId,
    ) -> Result<()> {
        let content = if exists {
            let current = self.files.download(&self.path).await?;
            self.codec.append_row(&current, entry)?
        } else {
            self.codec.new_workbook_with_header_and_row(entry)?
        };

        let files = &self.files;
        let path = self.path.as_str();
        let content = &content;
        let upload = self
            .policy
            .execute(clock, cancellation, correlation_id, move || {
                let content = content.clone();
                async move {
                    match files.upload(content, path, true, true).await? {
                        TransferStatus::Failed => Err(GatewayError::transfer(
                            TransferFailure::Other,
                            "file store reported failed transfer",
                        )),
                        status => Ok(status),
                    }
                }
            })
            .await;

        match upload {
            Ok(status) => {
                info!(
                    correlation_id = %correlation_id,
                    path = %self.path,
                    status = %status,
                    created = !exists,
                    "transcription appended to shared file"
                );
                Ok(())
            },
            Err(err) => {
                error!(
                    correlation_id = %correlation_id,
                    path = %self.path,
                    status = %TransferStatus::Failed,
                    error = %err,
                    "failed to write shared file"
                );
                Err(err)
            },
        }
    }
}

/// Spreadsheet codec producing comma-separated text.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSpreadsheetCodec;

impl CsvSpreadsheetCodec {
    /// Creates a new codec.
    pub fn new() -> Self {
        Self
    }

    fn record(entry: &TranscriptionEntry) -> [String; 5] {
        [
            entry.uuid.clone(),
            format_created_at(entry.creation_time),
            entry.from_phone_number.clone(),
            entry.to_phone_number.clone(),
            entry.transcription.replace('\u{202F}', " "),
        ]
    }

    fn encode(prefix: Vec<u8>, header: bool, entry: &TranscriptionEntry) -> Result<Bytes> {
        let mut writer = csv::Writer::from_writer(prefix);
        if header {
            writer.write_record(HEADER).map_err(|e| GatewayError::codec(e.to_string()))?;
        }
        writer.write_record(Self::record(entry)).map_err(|e| GatewayError::codec(e.to_string()))?;
        let bytes = writer.into_inner().map_err(|e| GatewayError::codec(e.to_string()))?;
        Ok(Bytes::from(bytes))
    }
}

impl SpreadsheetCodec for CsvSpreadsheetCodec {
    fn new_workbook_with_header_and_row(&self, entry: &TranscriptionEntry) -> Result<Bytes> {
        Self::encode(Vec::new(), true, entry)
    }

    fn append_row(&self, existing: &[u8], entry: &TranscriptionEntry) -> Result<Bytes> {
        if existing.is_empty() {
            return Self::encode(Vec::new(), true, entry);
        }

        let mut prefix = existing.to_vec();
        if !prefix.ends_with(b"\n") {
            prefix.push(b'\n');
        }
        Self::encode(prefix, false, entry)
    }
}

/// File store backed by a local directory.
///
/// Remote paths are resolved relative to the root, so `/shared/x.csv`
/// becomes `<root>/shared/x.csv`.
#[derive(Debug, Clone)]
pub struct LocalFileGateway {
    root: PathBuf,
}

impl LocalFileGateway {
    /// Creates a gateway rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn transfer_error(err: &io::Error, path: &str) -> GatewayError {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => TransferFailure::AccessDenied,
        io::ErrorKind::PermissionDenied => TransferFailure::Permission,
        _ => TransferFailure::Io,
    };
    GatewayError::transfer(kind, format!("{path}: {err}"))
}

impl FileGateway for LocalFileGateway {
    fn exists<'a>(&'a self, path: &'a str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            tokio::fs::try_exists(self.resolve(path)).await.map_err(|e| transfer_error(&e, path))
        })
    }

    fn download<'a>(&'a self, path: &'a str) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + 'a>> {
        Box::pin(async move {
            let content =
                tokio::fs::read(self.resolve(path)).await.map_err(|e| transfer_error(&e, path))?;
            Ok(Bytes::from(content))
        })
    }

    fn upload<'a>(
        &'a self,
        content: Bytes,
        path: &'a str,
        overwrite: bool,
        create_dir: bool,
    ) -> Pin<Box<dyn Future<Output = Result<TransferStatus>> + Send + 'a>> {
        Box::pin(async move {
            let target = self.resolve(path);

            if !overwrite
                && tokio::fs::try_exists(&target).await.map_err(|e| transfer_error(&e, path))?
            {
                return Ok(TransferStatus::Skipped);
            }

            if create_dir {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| transfer_error(&e, path))?;
                }
            }

            tokio::fs::write(&target, &content).await.map_err(|e| transfer_error(&e, path))?;
            Ok(TransferStatus::Success)
        })
    }
}

/// In-memory file store for tests.
///
/// Supports failing existence checks and a number of failing uploads.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileGateway {
    files: Arc<RwLock<HashMap<String, Bytes>>>,
    failing_uploads: Arc<AtomicUsize>,
    failing_exists: Arc<AtomicUsize>,
    uploads: Arc<AtomicUsize>,
}

impl InMemoryFileGateway {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a file directly.
    pub async fn put(&self, path: &str, content: impl Into<Bytes>) {
        self.files.write().await.insert(path.to_string(), content.into());
    }

    /// Returns a stored file.
    pub async fn get(&self, path: &str) -> Option<Bytes> {
        self.files.read().await.get(path).cloned()
    }

    /// Makes the next `count` uploads fail with an access-denied error.
    pub fn inject_upload_failures(&self, count: usize) {
        self.failing_uploads.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` existence checks fail.
    pub fn inject_exists_failures(&self, count: usize) {
        self.failing_exists.store(count, Ordering::SeqCst);
    }

    /// Number of upload calls, including failed ones.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

impl FileGateway for InMemoryFileGateway {
    fn exists<'a>(&'a self, path: &'a str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            if Self::take_failure(&self.failing_exists) {
                return Err(GatewayError::transfer(TransferFailure::Io, "connection reset"));
            }
            Ok(self.files.read().await.contains_key(path))
        })
    }

    fn download<'a>(&'a self, path: &'a str) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + 'a>> {
        Box::pin(async move {
            self.files.read().await.get(path).cloned().ok_or_else(|| {
                GatewayError::transfer(TransferFailure::AccessDenied, format!("550 {path}"))
            })
        })
    }

    fn upload<'a>(
        &'a self,
        content: Bytes,
        path: &'a str,
        overwrite: bool,
        _create_dir: bool,
    ) -> Pin<Box<dyn Future<Output = Result<TransferStatus>> + Send + 'a>> {
        Box::pin(async move {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if Self::take_failure(&self.failing_uploads) {
                return Err(GatewayError::transfer(TransferFailure::AccessDenied, format!("550 {path}")));
            }

            let mut files = self.files.write().await;
            if !overwrite && files.contains_key(path) {
                return Ok(TransferStatus::Skipped);
            }
            files.insert(path.to_string(), content);
            Ok(TransferStatus::Success)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn entry(transcription: &str) -> TranscriptionEntry {
        TranscriptionEntry {
            uuid: "a1".to_string(),
            creation_time: Utc.with_ymd_and_hms(2024, 3, 1, 17, 45, 15).unwrap(),
            from_phone_number: "+15551230001".to_string(),
            to_phone_number: "+15551230002".to_string(),
            transcription: transcription.to_string(),
        }
    }

    #[test]
    fn remote_path_joins_without_doubled_slashes() {
        assert_eq!(remote_path("/shared/", "/voicemails.csv"), "/shared/voicemails.csv");
        assert_eq!(remote_path("/shared", "voicemails.csv"), "/shared/voicemails.csv");
    }

    #[test]
    fn new_document_has_header_and_row() {
        let bytes = CsvSpreadsheetCodec.new_workbook_with_header_and_row(&entry("hi")).unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert_eq!(
            text,
            "UUID,Created At,From,To,Transcription\na1,03/01/2024 09:45,+15551230001,+15551230002,hi\n"
        );
    }

    #[test]
    fn created_at_uses_pacific_standard_time_in_winter() {
        let time = Utc.with_ymd_and_hms(2024, 1, 15, 20, 30, 0).unwrap();
        assert_eq!(format_created_at(time), "01/15/2024 12:30");
    }

    #[test]
    fn created_at_uses_pacific_daylight_time_in_summer() {
        let time = Utc.with_ymd_and_hms(2024, 7, 15, 20, 30, 0).unwrap();
        assert_eq!(format_created_at(time), "07/15/2024 13:30");
    }

    #[test]
    fn created_at_follows_the_daylight_saving_switch() {
        // 2024-03-10 10:00 UTC is 03:00 PDT, one hour after clocks sprang forward.
        let before = Utc.with_ymd_and_hms(2024, 3, 10, 9, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 10, 0, 0).unwrap();

        assert_eq!(format_created_at(before), "03/10/2024 01:59");
        assert_eq!(format_created_at(after), "03/10/2024 03:00");
    }

    #[test]
    fn created_at_rolls_back_the_date_across_midnight() {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        assert_eq!(format_created_at(time), "12/31/2023 19:00");
    }

    #[test]
    fn narrow_no_break_spaces_are_replaced() {
        let bytes =
            CsvSpreadsheetCodec.new_workbook_with_header_and_row(&entry("call\u{202F}back")).unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.contains(",call back\n"));
    }

    #[test]
    fn append_adds_row_without_header() {
        let first = CsvSpreadsheetCodec.new_workbook_with_header_and_row(&entry("one")).unwrap();
        let second = CsvSpreadsheetCodec.append_row(&first, &entry("two, three")).unwrap();
        let text = String::from_utf8(second.to_vec()).unwrap();

        assert_eq!(text.matches("UUID").count(), 1);
        assert!(text.ends_with("\"two, three\"\n"));
        assert_eq!(text.lines().count(), 3);
    }

    #[tokio::test]
    async fn local_gateway_round_trips_under_root() {
        let root = std::env::temp_dir().join(format!("vmscribe-{}", uuid::Uuid::new_v4()));
        let gateway = LocalFileGateway::new(&root);

        assert!(!gateway.exists("/shared/file.csv").await.unwrap());
        let status =
            gateway.upload(Bytes::from_static(b"x"), "/shared/file.csv", true, true).await.unwrap();
        assert_eq!(status, TransferStatus::Success);
        assert!(gateway.exists("/shared/file.csv").await.unwrap());
        assert_eq!(gateway.download("/shared/file.csv").await.unwrap(), Bytes::from_static(b"x"));

        let skipped =
            gateway.upload(Bytes::from_static(b"y"), "/shared/file.csv", false, true).await.unwrap();
        assert_eq!(skipped, TransferStatus::Skipped);

        tokio::fs::remove_dir_all(root).await.unwrap();
    }
}
