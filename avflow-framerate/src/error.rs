//! Error types for rate enforcement.

use thiserror::Error;

/// Errors produced by this crate.
#[derive(Error, Debug)]
pub enum FramerateError {
    /// The output context is unusable.
    #[error("Invalid output context: {0}")]
    InvalidOutputContext(String),

    /// Core error.
    #[error(transparent)]
    Core(#[from] avflow_core::Error),
}

impl FramerateError {
    /// Create an invalid-output-context error.
    pub fn invalid_output(msg: impl Into<String>) -> Self {
        FramerateError::InvalidOutputContext(msg.into())
    }
}

/// Result type alias for rate enforcement operations.
pub type Result<T> = std::result::Result<T, FramerateError>;
