//! Transform boundary and the external-program implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::command::{TransformCommand, TransformReport, TransformRunner};
use crate::error::TransformResult;

/// Converts an input artifact into an output artifact.
///
/// Contract: on `Ok` the implementation has exited successfully; whether it
/// actually wrote `output` is checked by the caller. Diagnostic output of a
/// failed run is carried in the error.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn run(&self, input: &Path, output: &Path) -> TransformResult<TransformReport>;
}

/// Fixed parameters of the external transform.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Program to execute
    pub program: String,
    /// Script handed to the program, if it is an interpreter
    pub script: Option<PathBuf>,
    /// Model config file
    pub model_config: PathBuf,
    /// Model weights file
    pub weights: PathBuf,
    /// Label file
    pub classes: PathBuf,
    /// Per-invocation timeout
    pub timeout: Option<Duration>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            script: Some(PathBuf::from("/workdir/yolo_opencv.py")),
            model_config: PathBuf::from("/workdir/yolov3.cfg"),
            weights: PathBuf::from("/workdir/yolov3.weights"),
            classes: PathBuf::from("/workdir/yolov3.txt"),
            timeout: None,
        }
    }
}

impl TransformConfig {
    /// Create config from environment variables.
    ///
    /// An empty `TRANSFORM_SCRIPT` runs the program directly.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            program: std::env::var("TRANSFORM_PROGRAM").unwrap_or(defaults.program),
            script: match std::env::var("TRANSFORM_SCRIPT") {
                Ok(s) if s.trim().is_empty() => None,
                Ok(s) => Some(PathBuf::from(s)),
                Err(_) => defaults.script,
            },
            model_config: std::env::var("TRANSFORM_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_config),
            weights: std::env::var("TRANSFORM_WEIGHTS")
                .map(PathBuf::from)
                .unwrap_or(defaults.weights),
            classes: std::env::var("TRANSFORM_CLASSES")
                .map(PathBuf::from)
                .unwrap_or(defaults.classes),
            timeout: std::env::var("TRANSFORM_TIMEOUT")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    /// Files the transform needs at run time.
    pub fn required_files(&self) -> Vec<&Path> {
        let mut files = Vec::new();
        if let Some(script) = &self.script {
            files.push(script.as_path());
        }
        files.push(self.model_config.as_path());
        files.push(self.weights.as_path());
        files.push(self.classes.as_path());
        files
    }
}

/// Transform implemented by an external executable.
#[derive(Debug, Clone)]
pub struct ExternalTransform {
    config: TransformConfig,
    runner: TransformRunner,
}

impl ExternalTransform {
    pub fn new(config: TransformConfig) -> Self {
        let runner = TransformRunner::new().with_timeout(config.timeout);
        Self { config, runner }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Build the invocation for one input/output pair.
    pub fn command(&self, input: &Path, output: &Path) -> TransformCommand {
        let mut cmd = TransformCommand::new(&self.config.program, input, output);
        if let Some(script) = &self.config.script {
            cmd = cmd.script(script);
        }
        cmd.model_config(&self.config.model_config)
            .weights(&self.config.weights)
            .classes(&self.config.classes)
    }
}

#[async_trait]
impl Transform for ExternalTransform {
    async fn run(&self, input: &Path, output: &Path) -> TransformResult<TransformReport> {
        let cmd = self.command(input, output);
        let report = self.runner.run(&cmd).await?;

        info!(
            "Transform finished in {:.2}s for {}",
            report.duration.as_secs_f64(),
            input.display()
        );
        if !report.stderr.is_empty() {
            debug!("Transform stderr: {}", report.stderr);
        }

        Ok(report)
    }
}
