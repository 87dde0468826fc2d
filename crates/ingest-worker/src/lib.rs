//! Artifact ingest worker.
//!
//! This crate provides:
//! - Per-job workspaces
//! - The job pipeline and its acknowledgment discipline
//! - A bounded dispatcher and the broker consumer loop feeding it
//! - Structured job logging and Prometheus metrics

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod workspace;

pub use config::WorkerConfig;
pub use consumer::{Consumer, ConsumerConfig, DeliverySource};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::{JobError, WorkerError, WorkerResult, WorkspaceError};
pub use logging::JobLogger;
pub use pipeline::JobPipeline;
pub use workspace::{Workspace, WorkspaceManager};
