//! Error types for gateway calls and workflow execution.
//!
//! [`GatewayError`] covers every failure an external collaborator can report
//! (message-store API, database, file store) and is what the retry policies
//! classify. [`WorkflowError`] is what a workflow run can fail with; the
//! orchestrator turns everything except cancellation into an
//! `Internal server error` result.

use std::fmt;

use thiserror::Error;
use vmscribe_core::{CoreError, ParseError};

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Kind of file transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    /// The store refused access to the path (FTP `550` class).
    AccessDenied,
    /// Local or remote I/O failed.
    Io,
    /// Insufficient permissions for the operation.
    Permission,
    /// Any other transfer failure.
    Other,
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessDenied => write!(f, "access_denied"),
            Self::Io => write!(f, "io"),
            Self::Permission => write!(f, "permission"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Message-store API answered with a non-success status.
    #[error("api error: HTTP {status_code}: {message}")]
    Api {
        /// HTTP status code
        status_code: u16,
        /// `Retry-After` header in seconds
        retry_after: Option<u64>,
        /// `X-Rate-Limit-Remaining` header
        rate_limit_remaining: Option<u64>,
        /// `X-Rate-Limit-Window` header in seconds
        rate_limit_window: Option<u64>,
        /// Response body or reason
        message: String,
    },

    /// Connection to the API could not be established.
    #[error("network error: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// Client-side request timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout
        timeout_seconds: u64,
    },

    /// Response body could not be decoded.
    #[error("invalid response: {message}")]
    Decode {
        /// Decoder message
        message: String,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] CoreError),

    /// File store transfer failure.
    #[error("file transfer failed ({kind}): {message}")]
    Transfer {
        /// Failure kind
        kind: TransferFailure,
        /// Error message
        message: String,
    },

    /// Spreadsheet content could not be encoded.
    #[error("spreadsheet encoding failed: {message}")]
    Codec {
        /// Encoder message
        message: String,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Creates an API error without rate-limit headers.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            retry_after: None,
            rate_limit_remaining: None,
            rate_limit_window: None,
            message: message.into(),
        }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    /// Creates a transfer error.
    pub fn transfer(kind: TransferFailure, message: impl Into<String>) -> Self {
        Self::Transfer { kind, message: message.into() }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec { message: message.into() }
    }

    /// Returns true if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true for failures that may succeed when repeated.
    ///
    /// Server errors, request timeouts and rate limits are transient API
    /// failures. Store failures are transient when their SQLSTATE says so.
    /// Every transfer failure is treated as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status_code, .. } => {
                *status_code >= 500 || *status_code == 408 || *status_code == 429
            },
            Self::Network { .. } | Self::Timeout { .. } | Self::Transfer { .. } => true,
            Self::Store(err) => err.is_transient(),
            Self::Decode { .. } | Self::Codec { .. } | Self::Cancelled => false,
        }
    }

    /// Returns the category used in log fields.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

/// Category of gateway error for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx other than 408 and 429).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Database operations.
    Database,
    /// File store operations.
    File,
    /// Encoding and decoding.
    Codec,
    /// Cancellation.
    Cancelled,
}

impl From<&GatewayError> for ErrorCategory {
    fn from(error: &GatewayError) -> Self {
        match error {
            GatewayError::Api { status_code: 429, .. } => Self::RateLimit,
            GatewayError::Api { status_code: 408, .. } => Self::Network,
            GatewayError::Api { status_code, .. } if *status_code >= 500 => Self::Server,
            GatewayError::Api { .. } => Self::Client,
            GatewayError::Network { .. } | GatewayError::Timeout { .. } => Self::Network,
            GatewayError::Store(_) => Self::Database,
            GatewayError::Transfer { .. } => Self::File,
            GatewayError::Decode { .. } | GatewayError::Codec { .. } => Self::Codec,
            GatewayError::Cancelled => Self::Cancelled,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Database => write!(f, "database"),
            Self::File => write!(f, "file"),
            Self::Codec => write!(f, "codec"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure of a workflow run.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// A collaborator failed after its retry policy gave up.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The event path did not carry an account scope.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A step output could not be stored or restored.
    #[error("checkpoint serialization failed: {message}")]
    Checkpoint {
        /// Serializer message
        message: String,
    },

    /// Replay found a different step at a recorded position.
    #[error("non-deterministic replay at sequence {sequence}: expected {expected}, found {found}")]
    NonDeterministic {
        /// Position in the history
        sequence: i32,
        /// Step the code is executing
        expected: String,
        /// Step recorded in the history
        found: String,
    },

    /// The instance or the engine was cancelled.
    #[error("workflow cancelled")]
    Cancelled,

    /// Running instances did not stop within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Configured timeout
        timeout: std::time::Duration,
    },
}

impl WorkflowError {
    /// Returns true if the run stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Gateway(GatewayError::Cancelled))
    }
}

impl From<CoreError> for WorkflowError {
    fn from(err: CoreError) -> Self {
        Self::Gateway(GatewayError::Store(err))
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Checkpoint { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_api_statuses() {
        assert!(GatewayError::api(500, "boom").is_transient());
        assert!(GatewayError::api(503, "unavailable").is_transient());
        assert!(GatewayError::api(408, "timeout").is_transient());
        assert!(GatewayError::api(429, "slow down").is_transient());
        assert!(GatewayError::timeout(30).is_transient());

        assert!(!GatewayError::api(400, "bad request").is_transient());
        assert!(!GatewayError::api(404, "missing").is_transient());
        assert!(!GatewayError::decode("not json").is_transient());
        assert!(!GatewayError::Cancelled.is_transient());
    }

    #[test]
    fn store_errors_follow_sqlstate_classification() {
        assert!(GatewayError::from(CoreError::transient("pool timed out")).is_transient());
        assert!(!GatewayError::from(CoreError::database("syntax error")).is_transient());
    }

    #[test]
    fn categories_display_as_snake_case() {
        assert_eq!(GatewayError::api(429, "").category().to_string(), "rate_limit");
        assert_eq!(GatewayError::api(502, "").category().to_string(), "server");
        assert_eq!(
            GatewayError::transfer(TransferFailure::AccessDenied, "550").category().to_string(),
            "file"
        );
    }

    #[test]
    fn cancellation_is_recognised_through_gateway_wrapper() {
        assert!(WorkflowError::Cancelled.is_cancelled());
        assert!(WorkflowError::from(GatewayError::Cancelled).is_cancelled());
        assert!(!WorkflowError::from(GatewayError::network("reset")).is_cancelled());
    }
}
