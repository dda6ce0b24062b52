//! Collaborator traits for the message store, file store and spreadsheet.
//!
//! The workflow only talks to the outside world through these traits.
//! Production adapters live in [`crate::client`] and [`crate::shared_file`];
//! [`mock`] provides scripted doubles for tests.

use std::{future::Future, pin::Pin};

use bytes::Bytes;
use vmscribe_core::models::{AccountScope, ContentDisposition, Message, TranscriptionEntry};

use crate::error::Result;

/// Fetches voicemail messages from the message store.
pub trait MessageGateway: Send + Sync + 'static {
    /// Fetches a message by id.
    ///
    /// Fails with `GatewayError::Api` for non-success responses.
    fn fetch_message(
        &self,
        scope: AccountScope,
        message_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Message>> + Send + '_>>;
}

/// Fetches attachment content from the message store.
pub trait TranscriptionGateway: Send + Sync + 'static {
    /// Fetches the text content of a transcription attachment.
    fn fetch_transcription_content(
        &self,
        scope: AccountScope,
        message_id: i64,
        attachment_id: i64,
        disposition: ContentDisposition,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// Outcome of an upload reported by the file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// The file was written.
    Success,
    /// The file existed and overwrite was not requested.
    Skipped,
    /// The store reported a failure without an error.
    Failed,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Remote file store holding the shared spreadsheet.
pub trait FileGateway: Send + Sync + 'static {
    /// Returns true if a file exists at `path`.
    fn exists<'a>(&'a self, path: &'a str)
        -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// Downloads the file at `path`.
    fn download<'a>(&'a self, path: &'a str)
        -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + 'a>>;

    /// Uploads `content` to `path`.
    fn upload<'a>(
        &'a self,
        content: Bytes,
        path: &'a str,
        overwrite: bool,
        create_dir: bool,
    ) -> Pin<Box<dyn Future<Output = Result<TransferStatus>> + Send + 'a>>;
}

/// Encodes transcription rows into the shared spreadsheet format.
pub trait SpreadsheetCodec: Send + Sync + 'static {
    /// Creates a new document holding the header row and `entry`.
    fn new_workbook_with_header_and_row(&self, entry: &TranscriptionEntry) -> Result<Bytes>;

    /// Appends `entry` to an existing document.
    fn append_row(&self, existing: &[u8], entry: &TranscriptionEntry) -> Result<Bytes>;
}

pub mod mock {
    //! Scripted gateway doubles for testing.
    //!
    //! Responses are queued up front and consumed in order. Every call is
    //! recorded so tests can assert on exactly what the workflow fetched.

    use std::{
        collections::VecDeque,
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use vmscribe_core::models::{AccountScope, ContentDisposition, Message};

    use super::{MessageGateway, TranscriptionGateway};
    use crate::error::{GatewayError, Result};

    /// Message gateway answering from a queue of scripted responses.
    ///
    /// Once the queue is empty every call fails with a 404.
    #[derive(Debug, Default)]
    pub struct ScriptedMessageGateway {
        responses: Mutex<VecDeque<Result<Message>>>,
        calls: Mutex<Vec<(AccountScope, i64)>>,
    }

    impl ScriptedMessageGateway {
        /// Creates a gateway with no scripted responses.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a gateway answering with `responses` in order.
        pub fn with_responses(responses: impl IntoIterator<Item = Result<Message>>) -> Self {
            Self { responses: Mutex::new(responses.into_iter().collect()), ..Self::default() }
        }

        /// Queues another response.
        pub fn push_response(&self, response: Result<Message>) {
            lock(&self.responses).push_back(response);
        }

        /// Number of fetches performed.
        pub fn call_count(&self) -> usize {
            lock(&self.calls).len()
        }

        /// Arguments of every fetch performed.
        pub fn recorded_calls(&self) -> Vec<(AccountScope, i64)> {
            lock(&self.calls).clone()
        }
    }

    impl MessageGateway for ScriptedMessageGateway {
        fn fetch_message(
            &self,
            scope: AccountScope,
            message_id: i64,
        ) -> Pin<Box<dyn Future<Output = Result<Message>> + Send + '_>> {
            lock(&self.calls).push((scope, message_id));
            let response = lock(&self.responses)
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::api(404, "no scripted response")));
            Box::pin(async move { response })
        }
    }

    /// Transcription gateway with a fixed answer.
    #[derive(Debug)]
    pub struct StaticTranscriptionGateway {
        response: Mutex<VecDeque<Result<String>>>,
        fallback: Result<String>,
        calls: AtomicUsize,
        panic_on_fetch: bool,
    }

    impl StaticTranscriptionGateway {
        /// Creates a gateway that always returns `text`.
        pub fn returning(text: impl Into<String>) -> Self {
            Self {
                response: Mutex::new(VecDeque::new()),
                fallback: Ok(text.into()),
                calls: AtomicUsize::new(0),
                panic_on_fetch: false,
            }
        }

        /// Creates a gateway that always fails with `error`.
        pub fn failing(error: GatewayError) -> Self {
            Self {
                response: Mutex::new(VecDeque::new()),
                fallback: Err(error),
                calls: AtomicUsize::new(0),
                panic_on_fetch: false,
            }
        }

        /// Creates a gateway that panics when called.
        pub fn panicking() -> Self {
            Self { panic_on_fetch: true, ..Self::returning("") }
        }

        /// Queues a one-off response served before the fixed answer.
        pub fn push_response(&self, response: Result<String>) {
            lock(&self.response).push_back(response);
        }

        /// Number of fetches performed.
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TranscriptionGateway for StaticTranscriptionGateway {
        fn fetch_transcription_content(
            &self,
            _scope: AccountScope,
            _message_id: i64,
            _attachment_id: i64,
            _disposition: ContentDisposition,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let panic_on_fetch = self.panic_on_fetch;
            let response = lock(&self.response).pop_front().unwrap_or_else(|| self.fallback.clone());
            Box::pin(async move {
                assert!(!panic_on_fetch, "transcription gateway exploded");
                response
            })
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
