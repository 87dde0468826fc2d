//! Error types for transform invocations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for transform operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Errors that can occur while running the transform.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Transform program not found: {0}")]
    ProgramNotFound(String),

    #[error("Transform failed: {message}")]
    Failed {
        message: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Transform timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transform produced no output file at {0}")]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    /// Create a failure from a non-zero exit.
    pub fn failed(message: impl Into<String>, exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Diagnostic output captured from the program, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            TransformError::Failed { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }
}
