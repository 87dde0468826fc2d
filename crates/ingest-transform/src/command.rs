//! Transform command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{TransformError, TransformResult};

/// Upper bound on captured diagnostic output per stream.
const MAX_CAPTURED_BYTES: usize = 64 * 1024;

/// How long output readers may run after the process has exited.
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Builder for transform invocations.
///
/// Produces `<program> [script] --image <in> --output <out> [extra args]`.
#[derive(Debug, Clone)]
pub struct TransformCommand {
    /// Program to execute (resolved through PATH)
    program: String,
    /// Script passed as first argument to an interpreter
    script: Option<PathBuf>,
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Arguments after input and output
    extra_args: Vec<String>,
}

impl TransformCommand {
    /// Create a new command.
    pub fn new(program: impl Into<String>, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            script: None,
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            extra_args: Vec::new(),
        }
    }

    /// Set the interpreter script.
    pub fn script(mut self, script: impl AsRef<Path>) -> Self {
        self.script = Some(script.as_ref().to_path_buf());
        self
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Add a `--flag value` pair where the value is a path.
    pub fn path_option(self, flag: &str, path: impl AsRef<Path>) -> Self {
        let value = path.as_ref().to_string_lossy().to_string();
        self.arg(flag).arg(value)
    }

    /// Set the model config file.
    pub fn model_config(self, path: impl AsRef<Path>) -> Self {
        self.path_option("--config", path)
    }

    /// Set the model weights file.
    pub fn weights(self, path: impl AsRef<Path>) -> Self {
        self.path_option("--weights", path)
    }

    /// Set the label (classes) file.
    pub fn classes(self, path: impl AsRef<Path>) -> Self {
        self.path_option("--classes", path)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(script) = &self.script {
            args.push(script.to_string_lossy().to_string());
        }

        args.push("--image".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.push("--output".to_string());
        args.push(self.output.to_string_lossy().to_string());

        args.extend(self.extra_args.clone());

        args
    }
}

/// Result of a successful transform run.
#[derive(Debug, Clone)]
pub struct TransformReport {
    /// Wall time of the process
    pub duration: Duration,
    /// Captured standard output (tail)
    pub stdout: String,
    /// Captured diagnostic output (tail)
    pub stderr: String,
}

/// Runner for transform commands with output capture and optional timeout.
#[derive(Debug, Clone)]
pub struct TransformRunner {
    timeout: Option<Duration>,
    drain_grace: Duration,
}

impl Default for TransformRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            timeout: None,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound the wait for stdout/stderr after the process exits. A background
    /// child that inherited the pipes would otherwise keep them open.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Run a transform command to completion.
    ///
    /// The child is killed if the returned future is dropped before it exits.
    pub async fn run(&self, cmd: &TransformCommand) -> TransformResult<TransformReport> {
        let program = check_program(cmd.program())?;
        let args = cmd.build_args();
        debug!("Running transform: {} {}", program.display(), args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout_handle = tokio::spawn(read_tail(child.stdout.take(), MAX_CAPTURED_BYTES));
        let stderr_handle = tokio::spawn(read_tail(child.stderr.take(), MAX_CAPTURED_BYTES));

        let status = self.wait_for_completion(&mut child).await?;

        let stdout = drain(stdout_handle, self.drain_grace, "stdout").await;
        let stderr = drain(stderr_handle, self.drain_grace, "stderr").await;
        let duration = started.elapsed();

        if status.success() {
            Ok(TransformReport {
                duration,
                stdout,
                stderr,
            })
        } else {
            let message = match status.code() {
                Some(code) => format!("{} exited with status {}", cmd.program(), code),
                None => format!("{} was terminated by a signal", cmd.program()),
            };
            Err(TransformError::failed(message, status.code(), stderr))
        }
    }

    /// Wait for child process with optional timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> TransformResult<std::process::ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(child.wait().await?);
        };

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!("Transform timed out after {:?}, killing process", timeout);
                let _ = child.kill().await;
                Err(TransformError::Timeout(timeout))
            }
        }
    }
}

/// Read a stream to its end, keeping at most `limit` trailing bytes.
async fn read_tail<R>(reader: Option<R>, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };

    let mut captured = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                captured.extend_from_slice(&buf[..n]);
                if captured.len() > limit {
                    let excess = captured.len() - limit;
                    captured.drain(..excess);
                }
            }
        }
    }

    String::from_utf8_lossy(&captured).trim_end().to_string()
}

/// Wait for an output reader, giving up after `grace`.
async fn drain(handle: JoinHandle<String>, grace: Duration, stream: &str) -> String {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(captured) => captured.unwrap_or_default(),
        Err(_) => {
            abort.abort();
            warn!("Transform {} still open after exit, discarding it", stream);
            String::new()
        }
    }
}

/// Check that a transform program is available.
pub fn check_program(program: &str) -> TransformResult<PathBuf> {
    which::which(program).map_err(|_| TransformError::ProgramNotFound(program.to_string()))
}
