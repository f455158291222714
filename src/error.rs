// Error handling module
// Fatal configuration errors and per-request failures

use std::time::Duration;
use thiserror::Error;

/// Errors that abort the run before any request is dispatched
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Two mutually exclusive modes were selected
    #[error("Cannot combine --{0} with --{1}")]
    ConflictingModes(&'static str, &'static str),

    /// Token-generation mode without a usable fixed prefix
    #[error("Token-generation mode requires a non-empty fixed prefix")]
    MissingFixedPrefix,

    /// The word-salad generator has nothing to draw from
    #[error("Prompt vocabulary is empty")]
    EmptyVocabulary,

    /// A configuration value is out of range or malformed
    #[error("Invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Failure of a single request. Recorded as a failed result, never propagated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// No complete response within the per-request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, reset, DNS failure and similar
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The body was not the JSON object we expect
    #[error("Malformed response body: {0}")]
    Parse(String),

    /// The request task panicked or was cancelled before producing a result
    #[error("Request task aborted: {0}")]
    Aborted(String),
}

impl RequestError {
    /// Short label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::Timeout(_) => "timeout",
            RequestError::Transport(_) => "transport",
            RequestError::Status { .. } => "status",
            RequestError::Parse(_) => "parse",
            RequestError::Aborted(_) => "aborted",
        }
    }
}

/// Result type alias for configuration steps
pub type Result<T> = std::result::Result<T, ConfigError>;
