//! Structured job logging.
//!
//! Every pipeline run executes inside a `job` span carrying the delivery id;
//! the job id and artifact key are recorded on the span once the message is
//! decoded, so every line emitted by the run carries them.

use tracing::field::Empty;
use tracing::{error, info, warn, Span};

use ingest_models::{JobDescriptor, PipelineStage};

use crate::error::JobError;

/// Create the span for one pipeline run.
pub fn job_span(delivery_id: &str, redelivered: bool) -> Span {
    tracing::info_span!(
        "job",
        delivery_id = %delivery_id,
        redelivered,
        job_id = Empty,
        artifact_key = Empty,
    )
}

/// Lifecycle logging for one decoded job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    artifact_key: String,
}

impl JobLogger {
    /// Create a logger and record the job's identity on the current span.
    pub fn new(job: &JobDescriptor) -> Self {
        let logger = Self {
            job_id: job.id.to_string(),
            artifact_key: job.artifact_key.to_string(),
        };

        let span = Span::current();
        span.record("job_id", logger.job_id.as_str());
        span.record("artifact_key", logger.artifact_key.as_str());
        logger
    }

    pub fn log_start(&self) {
        info!(
            job_id = %self.job_id,
            artifact_key = %self.artifact_key,
            "Job started"
        );
    }

    pub fn log_stage(&self, stage: PipelineStage, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = %stage,
            "{}", message
        );
    }

    pub fn log_warning(&self, stage: PipelineStage, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %stage,
            "Job warning: {}", message
        );
    }

    pub fn log_completion(&self) {
        info!(
            job_id = %self.job_id,
            artifact_key = %self.artifact_key,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn artifact_key(&self) -> &str {
        &self.artifact_key
    }
}

/// Log a failed run. Transform diagnostics are logged verbatim, never parsed.
pub fn log_failure(stage: PipelineStage, err: &JobError) {
    let stderr = match err {
        JobError::Transform(e) => e.stderr(),
        _ => None,
    };

    match stderr {
        Some(stderr) => error!(
            stage = %stage,
            stderr = %stderr,
            "Job failed: {}", err
        ),
        None => error!(stage = %stage, "Job failed: {}", err),
    }
}
