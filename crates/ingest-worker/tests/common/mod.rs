//! Fakes shared by the worker integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use ingest_models::{artifact_url, ArtifactKey, JobMessage};
use ingest_queue::{Acknowledger, Delivery, QueueResult};
use ingest_storage::MemoryStore;
use ingest_transform::{Transform, TransformError, TransformReport, TransformResult};
use ingest_worker::{JobPipeline, WorkspaceManager};

/// How a delivery was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ack(String),
    Reject(String),
}

/// Acknowledger that records every call.
#[derive(Debug, Default)]
pub struct RecordingAcker {
    resolutions: Mutex<Vec<Resolution>>,
}

impl RecordingAcker {
    pub fn resolutions(&self) -> Vec<Resolution> {
        self.resolutions.lock().unwrap().clone()
    }

    pub fn acks(&self) -> usize {
        self.resolutions()
            .iter()
            .filter(|r| matches!(r, Resolution::Ack(_)))
            .count()
    }

    pub fn rejects(&self) -> usize {
        self.resolutions()
            .iter()
            .filter(|r| matches!(r, Resolution::Reject(_)))
            .count()
    }
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self, delivery_id: &str) -> QueueResult<()> {
        self.resolutions
            .lock()
            .unwrap()
            .push(Resolution::Ack(delivery_id.to_string()));
        Ok(())
    }

    async fn reject(&self, delivery_id: &str, _body: &[u8], _reason: &str) -> QueueResult<()> {
        self.resolutions
            .lock()
            .unwrap()
            .push(Resolution::Reject(delivery_id.to_string()));
        Ok(())
    }
}

/// What the fake transform does with its input.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write `processed:<input>` to the output path
    Copy,
    /// Exit non-zero with a diagnostic message
    Fail,
    /// Exit zero without writing anything
    NoOutput,
    /// Sleep, then behave like `Copy`
    Slow(Duration),
    /// Panic
    Panic,
}

/// In-process transform that records its invocations.
#[derive(Debug)]
pub struct FakeTransform {
    behavior: Behavior,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    inputs: Mutex<Vec<PathBuf>>,
}

impl FakeTransform {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous invocations seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<PathBuf> {
        self.inputs.lock().unwrap().clone()
    }
}

/// Decrements the running count even when the invocation is cancelled.
struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transform for FakeTransform {
    async fn run(&self, input: &Path, output: &Path) -> TransformResult<TransformReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.to_path_buf());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        match &self.behavior {
            Behavior::Copy => {}
            Behavior::Fail => {
                return Err(TransformError::failed(
                    "exit status: 2",
                    Some(2),
                    "cv2.error: could not read image",
                ))
            }
            Behavior::NoOutput => return Ok(report()),
            Behavior::Slow(delay) => tokio::time::sleep(*delay).await,
            Behavior::Panic => panic!("transform crashed"),
        }

        let data = tokio::fs::read(input).await?;
        let mut processed = b"processed:".to_vec();
        processed.extend_from_slice(&data);
        tokio::fs::write(output, processed).await?;
        Ok(report())
    }
}

fn report() -> TransformReport {
    TransformReport {
        duration: Duration::from_millis(1),
        stdout: String::new(),
        stderr: String::new(),
    }
}

/// Pipeline wired to in-memory fakes and a private work directory.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub transform: Arc<FakeTransform>,
    pub acker: Arc<RecordingAcker>,
    pub pipeline: Arc<JobPipeline>,
    pub work_dir: TempDir,
}

impl Fixture {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_timeout(behavior, None)
    }

    pub fn with_timeout(behavior: Behavior, job_timeout: Option<Duration>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let transform = Arc::new(FakeTransform::new(behavior));
        let work_dir = TempDir::new().unwrap();
        let pipeline = JobPipeline::new(
            store.clone(),
            transform.clone(),
            WorkspaceManager::new(work_dir.path()),
        )
        .with_job_timeout(job_timeout);

        Self {
            store,
            transform,
            acker: Arc::new(RecordingAcker::default()),
            pipeline: Arc::new(pipeline),
            work_dir,
        }
    }

    /// A delivery carrying a job for `key` in the source bucket.
    pub fn delivery(&self, delivery_id: &str, job_id: i64, key: &str) -> Delivery {
        self.raw_delivery(delivery_id, job_body(job_id, key))
    }

    pub fn raw_delivery(&self, delivery_id: &str, body: impl Into<Vec<u8>>) -> Delivery {
        Delivery::new(delivery_id, body, self.acker.clone())
    }

    /// Entries left in the work directory.
    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.work_dir.path()).unwrap().count()
    }
}

/// Wire body of a job for `key` in the default source bucket.
pub fn job_body(job_id: i64, key: &str) -> Vec<u8> {
    let key = ArtifactKey::new(key).unwrap();
    let url = artifact_url("http://store:9000", "uploaded", &key).unwrap();
    JobMessage::new(job_id, url)
        .to_json()
        .unwrap()
        .into_bytes()
}
