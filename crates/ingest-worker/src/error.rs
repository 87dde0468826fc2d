//! Worker error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use ingest_models::DecodeError;
use ingest_storage::StorageError;
use ingest_transform::TransformError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Process-level errors: startup, configuration, broker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Startup check failed: {0}")]
    StartupFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] ingest_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn startup_failed(msg: impl Into<String>) -> Self {
        Self::StartupFailed(msg.into())
    }
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Local filesystem failures while managing a job workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove workspace {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type JobResult<T> = Result<T, JobError>;

/// Failure of one pipeline run. The failing stage is tracked by the pipeline.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),
}
