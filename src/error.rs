// Error types for starhop.
// Covers GitHub API errors, cache/store errors, and fetch pipeline failures.

use thiserror::Error;

/// Crate-wide error type.
///
/// The enum is `Clone` (wrapped sources are carried as strings) so a single
/// failure can be handed to every caller joined on a shared in-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StarhopError {
    #[error("invalid repository data received")]
    InvalidData,

    #[error("HTTP error: status {0}")]
    Http(u16),

    #[error("request timed out")]
    Timeout,

    #[error("rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("GitHub API error: {0}")]
    Api(String),

    #[error("JSON parsing error: {0}")]
    Json(String),

    #[error("request abandoned before completion")]
    Cancelled,
}

impl From<reqwest::Error> for StarhopError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StarhopError::Timeout
        } else {
            StarhopError::Api(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StarhopError {
    fn from(err: serde_json::Error) -> Self {
        StarhopError::Json(err.to_string())
    }
}

impl From<std::io::Error> for StarhopError {
    fn from(err: std::io::Error) -> Self {
        StarhopError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StarhopError>;
