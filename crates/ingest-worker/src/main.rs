//! Artifact ingest worker binary.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use ingest_queue::JobQueue;
use ingest_storage::{Bucket, S3Client};
use ingest_transform::{check_program, ExternalTransform, TransformConfig};
use ingest_worker::retry::{retry_async, RetryConfig};
use ingest_worker::{
    metrics, Consumer, ConsumerConfig, Dispatcher, JobPipeline, WorkerConfig, WorkerError,
    WorkerResult, WorkspaceManager,
};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["ingest=info", "aws_config=warn", "aws_smithy_runtime=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Clients that passed their startup checks.
struct Services {
    store: Arc<S3Client>,
    queue: Arc<JobQueue>,
    transform: Arc<ExternalTransform>,
}

/// Check every dependency, retrying the network ones briefly.
async fn start(config: &WorkerConfig) -> WorkerResult<Services> {
    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr).map_err(|e| {
            WorkerError::config_error(format!("metrics exporter on {}: {}", addr, e))
        })?;
        info!("Serving metrics on {}", addr);
    }

    // Object store
    let store = Arc::new(S3Client::from_env()?);
    let check = RetryConfig::new("store check");
    retry_async(&check, || store.check_bucket(Bucket::Source)).await?;
    retry_async(&check, || store.ensure_bucket(Bucket::Processed)).await?;

    // Queue
    let queue = Arc::new(JobQueue::from_env()?);
    retry_async(&RetryConfig::new("broker check"), || queue.ping()).await?;
    queue.init().await?;

    // Transform
    let transform_config = TransformConfig::from_env();
    check_program(&transform_config.program)
        .map_err(|e| WorkerError::startup_failed(format!("transform is not runnable: {}", e)))?;

    tokio::fs::create_dir_all(&config.work_dir).await?;

    Ok(Services {
        store,
        queue,
        transform: Arc::new(ExternalTransform::new(transform_config)),
    })
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS to the store and Redis)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting ingest-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let Services {
        store,
        queue,
        transform,
    } = match start(&config).await {
        Ok(services) => services,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = Arc::new(
        JobPipeline::new(store, transform, WorkspaceManager::new(&config.work_dir))
            .with_job_timeout(config.job_timeout),
    );

    let (sender, receiver) = mpsc::channel(config.channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = Consumer::new(
        Arc::clone(&queue),
        ConsumerConfig {
            poll_block: config.poll_block,
            claim_interval: config.claim_interval,
            claim_min_idle: config.claim_min_idle,
            ..ConsumerConfig::new(format!("worker-{}", Uuid::new_v4()))
        },
    );
    let consumer_handle = tokio::spawn(consumer.run(sender, shutdown_rx.clone()));

    let dispatcher = Dispatcher::new(config.concurrency, pipeline);
    let mut dispatcher_handle = tokio::spawn(dispatcher.run(receiver));

    if config.metrics_addr.is_some() {
        tokio::spawn(report_queue_stats(
            Arc::clone(&queue),
            config.claim_interval,
            shutdown_rx,
        ));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
        _ = &mut dispatcher_handle => {
            error!("Dispatcher stopped unexpectedly");
            std::process::exit(1);
        }
    }

    // Stop reading; workers drain what is buffered and finish in-flight runs.
    shutdown_tx.send(true).ok();
    consumer_handle.await.ok();

    match tokio::time::timeout(config.shutdown_timeout, dispatcher_handle).await {
        Ok(Ok(summary)) => info!(
            "Drained: {} succeeded, {} failed, {} panicked",
            summary.succeeded, summary.failed, summary.panicked
        ),
        Ok(Err(e)) => error!("Dispatcher task failed: {}", e),
        Err(_) => warn!(
            "In-flight jobs did not finish within {:?}, their deliveries stay pending",
            config.shutdown_timeout
        ),
    }

    info!("Worker shutdown complete");
}

async fn report_queue_stats(
    queue: Arc<JobQueue>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let stats = async {
                    Ok::<_, ingest_queue::QueueError>((
                        queue.len().await?,
                        queue.pending_len().await?,
                        queue.dlq_len().await?,
                    ))
                };
                match stats.await {
                    Ok((length, pending, dlq)) => metrics::set_queue_stats(length, pending, dlq),
                    Err(e) => warn!("Failed to read queue stats: {}", e),
                }
            }
        }
    }
}
