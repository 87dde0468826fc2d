//! Bounded worker pool.
//!
//! N workers share one receiver; each pulls a delivery, runs the pipeline to
//! completion and only then pulls again, so at most N runs (and N workspaces
//! and transform processes) exist at any time.

use std::ops::AddAssign;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use ingest_models::JobOutcome;
use ingest_queue::Delivery;

use crate::pipeline::{JobPipeline, PANIC_REASON};

/// Counts of finished pipeline runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub succeeded: u64,
    pub failed: u64,
    /// Runs that panicked; their deliveries were nacked and are not in
    /// `failed`.
    pub panicked: u64,
}

impl DispatchSummary {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.panicked
    }
}

impl AddAssign for DispatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.panicked += other.panicked;
    }
}

/// Fixed-size pool of pipeline workers.
pub struct Dispatcher {
    concurrency: usize,
    pipeline: Arc<JobPipeline>,
}

impl Dispatcher {
    pub fn new(concurrency: usize, pipeline: Arc<JobPipeline>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            pipeline,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run until `receiver` is closed and drained, then return once every
    /// worker has finished its last run.
    pub async fn run(self, receiver: mpsc::Receiver<Delivery>) -> DispatchSummary {
        info!("Starting dispatcher with {} workers", self.concurrency);

        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = JoinSet::new();
        for slot in 0..self.concurrency {
            workers.spawn(worker_loop(
                slot,
                Arc::clone(&receiver),
                Arc::clone(&self.pipeline),
            ));
        }

        let mut summary = DispatchSummary::default();
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(worker_summary) => summary += worker_summary,
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        info!(
            "Dispatcher stopped: {} succeeded, {} failed, {} panicked",
            summary.succeeded, summary.failed, summary.panicked
        );
        summary
    }
}

async fn worker_loop(
    slot: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    pipeline: Arc<JobPipeline>,
) -> DispatchSummary {
    debug!(slot, "Worker started");
    let mut summary = DispatchSummary::default();

    loop {
        // Only one idle worker waits on the channel at a time.
        let next = receiver.lock().await.recv().await;
        let Some(delivery) = next else {
            break;
        };

        match pipeline.process(delivery).await {
            JobOutcome::Success => summary.succeeded += 1,
            JobOutcome::Failed { reason, .. } if reason == PANIC_REASON => summary.panicked += 1,
            JobOutcome::Failed { .. } => summary.failed += 1,
        }
    }

    debug!(slot, "Worker stopped");
    summary
}
