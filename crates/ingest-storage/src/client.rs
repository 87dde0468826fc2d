//! S3-compatible client implementation.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::{Bucket, BucketNames, ObjectStore};

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Store endpoint URL, e.g. `http://minio:9000`
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Region (MinIO accepts any, defaults to us-east-1)
    pub region: String,
    /// Source and processed bucket names
    pub buckets: BucketNames,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let defaults = BucketNames::default();
        Ok(Self {
            endpoint_url: std::env::var("STORE_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("STORE_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("STORE_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("STORE_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("STORE_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("STORE_SECRET_ACCESS_KEY not set"))?,
            region: std::env::var("STORE_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            buckets: BucketNames {
                source: std::env::var("STORE_SOURCE_BUCKET").unwrap_or(defaults.source),
                processed: std::env::var("STORE_PROCESSED_BUCKET").unwrap_or(defaults.processed),
            },
        })
    }
}

/// S3 storage client (path-style, works against MinIO).
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    buckets: BucketNames,
    endpoint_url: String,
}

impl S3Client {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "ingest",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            buckets: config.buckets,
            endpoint_url: config.endpoint_url,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?))
    }

    /// Base URL of the store, used to build artifact URLs.
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Check that a bucket is reachable.
    pub async fn check_bucket(&self, bucket: Bucket) -> StorageResult<()> {
        let name = self.buckets.name(bucket);
        self.client
            .head_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|e| {
                StorageError::BucketCheckFailed(format!("{}: {}", name, DisplayErrorContext(&e)))
            })?;
        Ok(())
    }

    /// Create a bucket if it does not exist yet.
    pub async fn ensure_bucket(&self, bucket: Bucket) -> StorageResult<()> {
        let name = self.buckets.name(bucket);

        match self.client.head_bucket().bucket(name).send().await {
            Ok(_) => {
                debug!("Bucket {} exists", name);
                Ok(())
            }
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                info!("Bucket {} doesn't exist, creating", name);
                self.client
                    .create_bucket()
                    .bucket(name)
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::BucketCheckFailed(format!(
                            "create {}: {}",
                            name,
                            DisplayErrorContext(&e)
                        ))
                    })?;
                Ok(())
            }
            Err(e) => Err(StorageError::BucketCheckFailed(format!(
                "{}: {}",
                name,
                DisplayErrorContext(&e)
            ))),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    fn bucket_name(&self, bucket: Bucket) -> &str {
        self.buckets.name(bucket)
    }

    async fn download_file(&self, bucket: Bucket, key: &str, path: &Path) -> StorageResult<u64> {
        let name = self.buckets.name(bucket);
        debug!("Downloading {}/{} to {}", name, key, path.display());

        let response = self
            .client
            .get_object()
            .bucket(name)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::not_found(name, key)
                } else {
                    StorageError::download_failed(DisplayErrorContext(&e).to_string())
                }
            })?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!("Downloaded {}/{} ({} bytes)", name, key, written);
        Ok(written)
    }

    async fn upload_file(&self, bucket: Bucket, key: &str, path: &Path) -> StorageResult<u64> {
        let name = self.buckets.name(bucket);
        debug!("Uploading {} to {}/{}", path.display(), name, key);

        let size = tokio::fs::metadata(path).await?.len();
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(name)
            .key(key)
            .body(body)
            .content_length(size as i64)
            .content_type(content_type_for(key))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(DisplayErrorContext(&e).to_string()))?;

        info!("Uploaded {}/{} ({} bytes)", name, key, size);
        Ok(size)
    }

    async fn delete_object(&self, bucket: Bucket, key: &str) -> StorageResult<()> {
        let name = self.buckets.name(bucket);
        debug!("Deleting {}/{}", name, key);

        self.client
            .delete_object()
            .bucket(name)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

/// Content type recorded on uploaded objects, from the key's extension.
fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
