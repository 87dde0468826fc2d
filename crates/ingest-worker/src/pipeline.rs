//! Per-job pipeline.
//!
//! decode → stage → download → transform → collect → upload → retire →
//! finalize. The first failing stage short-circuits to finalize, which always
//! removes the workspace. Completed side effects are not rolled back: a run
//! that fails at retire has already written the processed artifact.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn, Instrument};

use ingest_models::{JobDescriptor, JobOutcome, PipelineStage};
use ingest_queue::Delivery;
use ingest_storage::{Bucket, ObjectStore};
use ingest_transform::{Transform, TransformError};

use crate::error::{JobError, JobResult};
use crate::logging::{job_span, log_failure, JobLogger};
use crate::metrics;
use crate::workspace::{Workspace, WorkspaceManager};

/// Nack reason for a run that panicked.
pub const PANIC_REASON: &str = "panic";

/// Stage a run is currently in. Survives cancellation of the run, so a
/// timed-out or panicked job still reports where it stopped.
#[derive(Debug)]
struct StageCursor {
    state: Mutex<CursorState>,
}

#[derive(Debug)]
struct CursorState {
    stage: PipelineStage,
    started: Instant,
    open: bool,
    timings: Vec<(PipelineStage, Duration)>,
}

impl CursorState {
    /// Record the current stage's duration once.
    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let elapsed = self.started.elapsed();
        metrics::record_stage_duration(self.stage, elapsed.as_secs_f64());
        self.timings.push((self.stage, elapsed));
    }
}

impl StageCursor {
    fn new() -> Self {
        Self {
            state: Mutex::new(CursorState {
                stage: PipelineStage::Decode,
                started: Instant::now(),
                open: true,
                timings: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CursorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, stage: PipelineStage) {
        let mut state = self.lock();
        state.close();
        state.stage = stage;
        state.started = Instant::now();
        state.open = true;
    }

    /// Close the current stage without entering another one.
    fn finish(&self) {
        self.lock().close();
    }

    fn get(&self) -> PipelineStage {
        self.lock().stage
    }

    #[cfg(test)]
    fn timings(&self) -> Vec<(PipelineStage, Duration)> {
        self.lock().timings.clone()
    }
}

/// Runs jobs against the shared store and transform.
pub struct JobPipeline {
    store: Arc<dyn ObjectStore>,
    transform: Arc<dyn Transform>,
    workspaces: WorkspaceManager,
    job_timeout: Option<Duration>,
}

impl JobPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transform: Arc<dyn Transform>,
        workspaces: WorkspaceManager,
    ) -> Self {
        Self {
            store,
            transform,
            workspaces,
            job_timeout: None,
        }
    }

    /// Deadline for a whole run. On expiry the run fails at the stage it was in.
    pub fn with_job_timeout(mut self, job_timeout: Option<Duration>) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    /// Run a delivery to completion and resolve it: ack on success, nack
    /// without requeue on failure.
    ///
    /// The stages run in their own task. A panic there fails the job at the
    /// stage it was in and the delivery is nacked with [`PANIC_REASON`].
    /// A failed ack or nack is logged and leaves the message pending in the
    /// broker, where it is reclaimed later.
    pub async fn process(self: &Arc<Self>, delivery: Delivery) -> JobOutcome {
        let span = job_span(delivery.id(), delivery.is_redelivered());

        async move {
            let started = Instant::now();
            let cursor = Arc::new(StageCursor::new());

            let run = {
                let pipeline = Arc::clone(self);
                let cursor = Arc::clone(&cursor);
                let body = delivery.body().to_vec();
                tokio::spawn(
                    async move { pipeline.run_tracked(&body, &cursor).await }.in_current_span(),
                )
            };

            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    cursor.finish();
                    let stage = cursor.get();
                    metrics::record_pipeline_panic();
                    error!(stage = %stage, "Pipeline run aborted: {}", e);
                    let outcome = JobOutcome::failed(stage, PANIC_REASON);
                    metrics::record_job(&outcome, started.elapsed().as_secs_f64());
                    outcome
                }
            };

            let resolution = match &outcome {
                JobOutcome::Success => delivery.ack().await.map_err(|e| ("ack", e)),
                JobOutcome::Failed { stage, reason } => delivery
                    .nack(&format!("{stage}: {reason}"))
                    .await
                    .map_err(|e| ("nack", e)),
            };

            if let Err((action, e)) = resolution {
                metrics::record_resolution_failure(action);
                error!("Failed to {} delivery, it stays pending: {}", action, e);
            }

            outcome
        }
        .instrument(span)
        .await
    }

    /// Run the stages for one message body without resolving the delivery.
    pub async fn execute(&self, body: &[u8]) -> JobOutcome {
        self.run_tracked(body, &StageCursor::new()).await
    }

    async fn run_tracked(&self, body: &[u8], cursor: &StageCursor) -> JobOutcome {
        let started = Instant::now();

        let run = self.run_stages(body, cursor);
        let result = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Err(JobError::Timeout(limit)),
            },
            None => run.await,
        };

        let outcome = match result {
            Ok(()) => JobOutcome::Success,
            Err(e) => {
                cursor.finish();
                let stage = cursor.get();
                log_failure(stage, &e);
                JobOutcome::failed(stage, e.to_string())
            }
        };

        metrics::record_job(&outcome, started.elapsed().as_secs_f64());
        outcome
    }

    async fn run_stages(&self, body: &[u8], cursor: &StageCursor) -> JobResult<()> {
        let job = JobDescriptor::decode(body, self.store.bucket_name(Bucket::Source))?;
        let logger = JobLogger::new(&job);
        logger.log_start();

        cursor.enter(PipelineStage::Stage);
        let workspace = self
            .workspaces
            .create(job.artifact_key.file_name())
            .await?;
        debug!("Workspace at {}", workspace.root().display());

        let result = self.run_in_workspace(&job, &workspace, &logger, cursor).await;
        cursor.finish();

        // Finalize
        let finalize_started = Instant::now();
        if let Err(e) = workspace.destroy().await {
            logger.log_warning(PipelineStage::Finalize, &e.to_string());
        }
        metrics::record_stage_duration(
            PipelineStage::Finalize,
            finalize_started.elapsed().as_secs_f64(),
        );

        if result.is_ok() {
            logger.log_completion();
        }
        result
    }

    async fn run_in_workspace(
        &self,
        job: &JobDescriptor,
        workspace: &Workspace,
        logger: &JobLogger,
        cursor: &StageCursor,
    ) -> JobResult<()> {
        let key = job.artifact_key.as_str();

        cursor.enter(PipelineStage::Download);
        let bytes = self
            .store
            .download_file(Bucket::Source, key, workspace.input_path())
            .await?;
        logger.log_stage(PipelineStage::Download, &format!("Downloaded {} bytes", bytes));

        cursor.enter(PipelineStage::Transform);
        let report = {
            let _in_flight = metrics::TransformInFlight::start();
            self.transform
                .run(workspace.input_path(), workspace.output_path())
                .await?
        };
        metrics::record_transform_duration(report.duration.as_secs_f64());
        logger.log_stage(
            PipelineStage::Transform,
            &format!("Transform finished in {:.2}s", report.duration.as_secs_f64()),
        );

        cursor.enter(PipelineStage::Collect);
        collect_output(workspace).await?;

        cursor.enter(PipelineStage::Upload);
        let bytes = self
            .store
            .upload_file(Bucket::Processed, key, workspace.output_path())
            .await?;
        logger.log_stage(PipelineStage::Upload, &format!("Uploaded {} bytes", bytes));

        cursor.enter(PipelineStage::Retire);
        if let Err(e) = self.store.delete_object(Bucket::Source, key).await {
            warn!(
                "Processed artifact {} was written but the source could not be deleted",
                key
            );
            return Err(e.into());
        }

        Ok(())
    }
}

/// The transform must have left a regular file at the output path.
async fn collect_output(workspace: &Workspace) -> JobResult<()> {
    let missing = || TransformError::MissingOutput(workspace.output_path().to_path_buf());

    let file = tokio::fs::File::open(workspace.output_path())
        .await
        .map_err(|_| missing())?;
    let meta = file.metadata().await.map_err(TransformError::Io)?;
    if !meta.is_file() {
        return Err(missing().into());
    }
    Ok(())
}
