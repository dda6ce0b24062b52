//! Error types for parsing and persistence.
//!
//! Parse failures are definitive and never retried. Database failures carry
//! their SQLSTATE and a transient flag so the database retry policy can log
//! what kind of failure it is retrying.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// SQLSTATE codes of connection, throttling and timeout class failures.
///
/// Covers connection exceptions (class 08), serialization failures and
/// deadlocks, lock timeouts, query cancellation, too many connections, and
/// server shutdown or restart.
pub const TRANSIENT_SQLSTATES: &[&str] = &[
    "08000", "08001", "08003", "08004", "08006", "40001", "40P01", "53300", "55P03", "57014",
    "57P01", "57P02", "57P03",
];

/// Core error type for persistence operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("database error: {message}")]
    Database {
        /// Driver or server message
        message: String,
        /// SQLSTATE reported by the server, if any
        code: Option<String>,
        /// Whether the failure belongs to a transient class
        transient: bool,
    },

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Constraint violation.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Creates a non-transient database error from a message.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into(), code: None, transient: false }
    }

    /// Creates a transient database error from a message.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Database { message: message.into(), code: None, transient: true }
    }

    /// Returns true for connection, throttling and timeout class failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { transient: true, .. })
    }

    /// SQLSTATE of the failure, if the server reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::ConstraintViolation(format!("foreign key constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|code| code.into_owned());
                let transient =
                    code.as_deref().is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code));
                Self::Database { message: db_err.to_string(), code, transient }
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::transient(err.to_string())
            },
            _ => Self::database(err.to_string()),
        }
    }
}

/// Failure to turn a webhook body into a [`crate::models::WebhookEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Body was empty or whitespace.
    #[error("payload is empty")]
    Empty,

    /// Body was not a JSON object of the expected shape.
    #[error("payload is not valid JSON: {reason}")]
    MalformedJson {
        /// Decoder message
        reason: String,
    },

    /// Event path does not name a numeric account and extension.
    #[error("event path has no account scope: {event_path}")]
    MissingAccountScope {
        /// The offending event path
        event_path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeouts_are_transient() {
        let error = CoreError::from(sqlx::Error::PoolTimedOut);
        assert!(error.is_transient());
        assert_eq!(error.code(), None);
    }

    #[test]
    fn row_not_found_is_not_transient() {
        let error = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, CoreError::NotFound(_)));
        assert!(!error.is_transient());
    }

    #[test]
    fn error_display_format() {
        assert_eq!(CoreError::database("boom").to_string(), "database error: boom");
        assert_eq!(ParseError::Empty.to_string(), "payload is empty");
        assert_eq!(
            ParseError::MissingAccountScope { event_path: "/x".to_string() }.to_string(),
            "event path has no account scope: /x"
        );
    }
}
