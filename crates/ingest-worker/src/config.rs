//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent pipeline runs
    pub concurrency: usize,
    /// Capacity of the channel between consumer and dispatcher
    pub channel_capacity: usize,
    /// Work directory for job workspaces
    pub work_dir: PathBuf,
    /// Deadline of a single pipeline run, `None` disables it
    pub job_timeout: Option<Duration>,
    /// How long one broker read blocks when the queue is empty
    pub poll_block: Duration,
    /// How often the consumer scans for deliveries abandoned by crashed consumers
    pub claim_interval: Duration,
    /// Minimum idle time before a pending delivery can be claimed
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Address of the Prometheus scrape endpoint, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            channel_capacity: 1,
            work_dir: std::env::temp_dir().join("ingest"),
            job_timeout: Some(Duration::from_secs(600)), // 10 minutes
            poll_block: Duration::from_millis(1000),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(900), // 15 minutes, above job_timeout
            shutdown_timeout: Duration::from_secs(30),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            channel_capacity: std::env::var("WORKER_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.channel_capacity),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            job_timeout: match std::env::var("WORKER_JOB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.job_timeout,
            },
            poll_block: Duration::from_millis(
                std::env::var("WORKER_POLL_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_min_idle: Duration::from_secs(
                std::env::var("WORKER_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            metrics_addr: std::env::var("WORKER_METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}
