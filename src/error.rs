//! Error types for presto-stream.

use thiserror::Error;

/// Error type for presto-stream operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The SQL statement was empty.
    #[error("SQL statement must not be empty")]
    EmptySql,

    /// A session property name did not match `^[a-z]+[a-z_.]*[a-z]+$`.
    #[error("invalid session property name: {0:?}")]
    InvalidSessionKey(String),

    /// A floating-point session property value was NaN or infinite.
    #[error("session property value must be finite, got {0}")]
    NonFiniteSessionValue(f64),

    /// A duration option that must be positive was zero.
    #[error("{0} must be a positive duration")]
    InvalidDuration(&'static str),

    /// The configured coordinator port was zero.
    #[error("port must be greater than zero")]
    InvalidPort,

    /// A caller-supplied header could not be encoded.
    #[error("invalid header {name:?}")]
    InvalidHeader {
        /// Header name as supplied by the caller.
        name: String,
    },

    /// HTTP request failed (connection, timeout, body decode).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-retryable HTTP failure status (4xx, non-503 5xx).
    ///
    /// The message is the trimmed `text/plain` body when the coordinator sent
    /// one, otherwise the standard reason phrase.
    #[error("{message}")]
    HttpStatus {
        /// Numeric HTTP status code.
        status: u16,
        /// Body text or reason phrase.
        message: String,
    },

    /// A status outside the error range that was not the expected one.
    #[error("Unexpected HTTP status code: {0}")]
    UnexpectedStatus(u16),

    /// A JSON response arrived with a different content type.
    #[error("Unexpected HTTP content type: {0}")]
    UnexpectedContentType(String),

    /// Protocol violation: bad redirect, invalid `nextUri`, data before
    /// columns.
    #[error("{0}")]
    Protocol(String),

    /// Failed to parse a response body as JSON.
    #[error("failed to decode response body: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reported by the coordinator inside a 200 response.
    #[error("{code}: {message}")]
    Presto {
        /// Presto `errorName`, e.g. `SYNTAX_ERROR`.
        code: String,
        /// Presto `errorType`, e.g. `USER_ERROR`.
        error_type: String,
        /// Message as sent by the coordinator.
        message: String,
        /// Optional `failureInfo` payload.
        info: Option<serde_json::Value>,
    },

    /// The statement was cancelled.
    ///
    /// Carries the caller-supplied reason (if `cancel_with` was used) and the
    /// error from the `DELETE /v1/query/{id}` request if that failed too.
    #[error("query cancelled")]
    Cancelled {
        /// Reason passed to `cancel_with`, if any.
        reason: Option<Box<Error>>,
        /// Failure of the cancellation DELETE, if any.
        source: Option<Box<Error>>,
    },
}

impl Error {
    /// Numeric HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            Error::UnexpectedStatus(status) => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Presto `errorName` for coordinator-reported errors.
    pub fn presto_code(&self) -> Option<&str> {
        match self {
            Error::Presto { code, .. } => Some(code),
            _ => None,
        }
    }

    /// True if the underlying failure was a socket timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_timeout())
    }

    /// True if the statement ended through cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// Result type alias for presto-stream operations.
pub type Result<T> = std::result::Result<T, Error>;
