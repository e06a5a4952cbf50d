//! Error types for the baseline pipeline
//!
//! ## Table of Contents
//! - **BaselineError**: Main error enum covering all failure modes
//! - **Result**: Type alias for `Result<T, BaselineError>`

use std::time::Duration;
use thiserror::Error;

/// Result type alias for baseline operations
pub type Result<T> = std::result::Result<T, BaselineError>;

/// Main error type for baseline operations
#[derive(Error, Debug)]
pub enum BaselineError {
    /// Configuration error during builder setup or config loading
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed arguments (mismatched array lengths, duplicate labels)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Connection-level failure talking to the forecasting backend
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with a non-success HTTP status
    #[error("backend returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// A single backend attempt exceeded its deadline
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Circuit breaker rejected the call without touching the network
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// Backend response could not be decoded
    #[error("malformed backend response: {0}")]
    Parse(String),

    /// Request queue was closed while waiting for a slot
    #[error("request queue closed")]
    QueueClosed,

    /// Metrics registration or export failure
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Generic IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error outside of backend responses
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BaselineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a metrics error
    pub fn metrics(msg: impl Into<String>) -> Self {
        Self::Metrics(msg.into())
    }

    /// Whether another attempt against the backend may succeed.
    ///
    /// Timeouts are deliberately excluded: a stuck backend is not hit again
    /// within the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Status { .. })
    }

    /// Short label used for log fields and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidInput(_) => "invalid_input",
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::Timeout(_) => "timeout",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Parse(_) => "parse",
            Self::QueueClosed => "queue_closed",
            Self::Metrics(_) => "metrics",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<reqwest::Error> for BaselineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<prometheus::Error> for BaselineError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}
