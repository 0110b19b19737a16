//! Error types shared across the avflow workspace.

use thiserror::Error;

/// Main error type for avflow components.
#[derive(Error, Debug)]
pub enum Error {
    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Probing was cancelled before the input was ready.
    #[error("Probing cancelled")]
    ProbeCancelled,

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Opening an input failed.
    #[error("Opening input failed: {0}")]
    Open(String),

    /// Probing stream information failed.
    #[error("Probing input failed: {0}")]
    Probe(String),

    /// Seek operation failed.
    #[error("Seek failed: {0}")]
    Seek(String),

    /// Referencing a pooled object failed.
    #[error("Referencing failed: {0}")]
    Ref(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }

    /// Check if this error was caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::ProbeCancelled)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
