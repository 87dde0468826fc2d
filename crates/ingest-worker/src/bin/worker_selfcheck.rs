use std::path::Path;

use anyhow::{bail, Context};

use ingest_queue::QueueConfig;
use ingest_transform::{check_program, TransformConfig};
use ingest_worker::WorkerConfig;

/// Settings without a default. The queue falls back to a local Redis, so
/// `REDIS_URL` is optional.
const REQUIRED_ENV: &[&str] = &[
    "STORE_ENDPOINT_URL",
    "STORE_ACCESS_KEY_ID",
    "STORE_SECRET_ACCESS_KEY",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    let transform = TransformConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_transform(&transform)?;
    report_queue(&QueueConfig::from_env());
    ensure_env_present(REQUIRED_ENV)?;

    println!("worker-selfcheck: ok");
    Ok(())
}

/// The work directory must exist and accept new files.
async fn ensure_workdir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("cannot create work dir {}", path.display()))?;

    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok")
        .await
        .with_context(|| format!("work dir {} is not writable", path.display()))?;
    tokio::fs::remove_file(&marker).await.ok();
    Ok(())
}

fn ensure_transform(config: &TransformConfig) -> anyhow::Result<()> {
    let program = check_program(&config.program)?;
    println!("worker-selfcheck: transform program {}", program.display());

    for file in config.required_files() {
        if !file.is_file() {
            bail!("transform file {} is missing", file.display());
        }
    }
    Ok(())
}

fn report_queue(config: &QueueConfig) {
    println!(
        "worker-selfcheck: queue {} (group {})",
        config.stream_key(),
        config.consumer_group
    );
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            bail!("missing required env var {}", var);
        }
    }
    Ok(())
}
