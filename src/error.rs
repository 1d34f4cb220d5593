//! Error types for the benchmark harness.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors that can occur in the harness.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The benchmark source does not exist.
    #[error("Benchmark source not found at '{0}'")]
    SourceNotFound(PathBuf),

    /// The benchmark source exists but has the wrong shape.
    #[error("Invalid benchmark source '{path}': {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    /// An image could not be decoded or re-encoded.
    #[error("Image error for '{path}': {reason}")]
    Image { path: PathBuf, reason: String },

    /// A task cannot be turned into a prompt for the chosen variant.
    #[error("Task '{id}' is not usable: {reason}")]
    InvalidTask { id: String, reason: String },

    /// The inference endpoint call failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BenchError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an image error with path context.
    pub fn image(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Image {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(err: serde_json::Error) -> Self {
        BenchError::Serialization(err.to_string())
    }
}

/// Failure of a single inference call.
///
/// Transport failures and malformed responses are handled identically by the
/// runner; they are kept apart so the log says which one happened.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// The endpoint answered with a non-success status.
    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// No response arrived within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request never completed (DNS, refused connection, reset...).
    #[error("connection failed: {0}")]
    Connection(String),

    /// 2xx response without the expected generated text.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl InferenceError {
    /// HTTP status if the endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
