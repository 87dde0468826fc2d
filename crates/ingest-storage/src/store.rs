//! Object store abstraction.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Logical bucket an artifact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Uploaded artifacts waiting to be processed
    Source,
    /// Transform results
    Processed,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Source => f.write_str("source"),
            Bucket::Processed => f.write_str("processed"),
        }
    }
}

/// Physical names of the two logical buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
    pub source: String,
    pub processed: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            source: "uploaded".to_string(),
            processed: "processed".to_string(),
        }
    }
}

impl BucketNames {
    pub fn name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Source => &self.source,
            Bucket::Processed => &self.processed,
        }
    }
}

/// Fetch, write and delete named binary artifacts.
///
/// Implementations are shared by every worker and must tolerate concurrent
/// calls.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Physical name of a logical bucket.
    fn bucket_name(&self, bucket: Bucket) -> &str;

    /// Stream an object into a local file. Returns the number of bytes written.
    ///
    /// Fails with `StorageError::NotFound` if the object does not exist.
    async fn download_file(&self, bucket: Bucket, key: &str, path: &Path) -> StorageResult<u64>;

    /// Write a local file to an object, replacing any existing one. Returns
    /// the number of bytes uploaded.
    async fn upload_file(&self, bucket: Bucket, key: &str, path: &Path) -> StorageResult<u64>;

    /// Delete an object.
    async fn delete_object(&self, bucket: Bucket, key: &str) -> StorageResult<()>;
}
