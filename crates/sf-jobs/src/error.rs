//! Error types for sf-jobs.

use std::time::Duration;

/// Result type alias for job client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by a [`JobClient`](crate::JobClient) call.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this error may succeed when the call is repeated.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns true if the failure happened below the API (network, 5xx, throttling).
    pub fn is_transport(&self) -> bool {
        self.kind.is_transport()
    }

    /// Returns true if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Authentication(_))
    }

    /// Returns the retry-after duration if this is a rate limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match &self.kind {
            ErrorKind::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The call did not complete in time.
    #[error("Request timeout")]
    Timeout,

    /// Connection refused, reset or dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Non-success HTTP status without a structured API error.
    #[error("HTTP error: {status} {message}")]
    Http { status: u16, message: String },

    /// Rate limit exceeded (HTTP 429).
    #[error("Rate limited{}", retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// Session expired or credentials rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The uploaded payload was rejected as a whole.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// An org-level limit (API requests, batches per day) was hit.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Job or batch unknown to the server.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Structured Salesforce API error.
    #[error("Salesforce API error: {error_code} - {message}")]
    Api { error_code: String, message: String },

    /// All attempts of a retried call failed; `last` is the final error's message.
    #[error("All {attempts} attempts exhausted: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ErrorKind {
    /// Returns true if this error kind is retryable.
    pub fn is_retryable(&self) -> bool {
        self.is_transport()
    }

    /// Returns true for network-level and server-side transient failures.
    pub fn is_transport(&self) -> bool {
        match self {
            ErrorKind::Timeout => true,
            ErrorKind::Connection(_) => true,
            ErrorKind::RateLimited { .. } => true,
            ErrorKind::Http { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Check if an HTTP status code is typically retryable.
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::with_source(ErrorKind::InvalidData(err.to_string()), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::InvalidData(err.to_string()), err)
    }
}
