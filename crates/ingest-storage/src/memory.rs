//! In-memory object store.
//!
//! Keeps objects in a map keyed by bucket and key. Operations can be made to
//! fail on demand, which lets callers exercise every failure exit of code
//! that depends on `ObjectStore`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::{Bucket, BucketNames, ObjectStore};

/// Store operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Download,
    Upload,
    Delete,
}

/// Object store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: BucketNames,
    objects: Mutex<HashMap<(Bucket, String), Vec<u8>>>,
    failing: Mutex<HashSet<StoreOperation>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets(buckets: BucketNames) -> Self {
        Self {
            buckets,
            ..Self::default()
        }
    }

    /// Insert or replace an object.
    pub fn put(&self, bucket: Bucket, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock_objects().insert((bucket, key.into()), data.into());
    }

    /// Read an object.
    pub fn get(&self, bucket: Bucket, key: &str) -> Option<Vec<u8>> {
        self.lock_objects().get(&(bucket, key.to_string())).cloned()
    }

    pub fn contains(&self, bucket: Bucket, key: &str) -> bool {
        self.lock_objects().contains_key(&(bucket, key.to_string()))
    }

    /// Number of objects in a bucket.
    pub fn len(&self, bucket: Bucket) -> usize {
        self.lock_objects().keys().filter(|(b, _)| *b == bucket).count()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_objects().is_empty()
    }

    /// Make every subsequent call of `operation` fail.
    pub fn fail_operation(&self, operation: StoreOperation) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(operation);
    }

    /// Number of trait calls made against this store.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, HashMap<(Bucket, String), Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, operation: StoreOperation) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&operation);

        if !failing {
            return Ok(());
        }

        Err(match operation {
            StoreOperation::Download => StorageError::download_failed("injected failure"),
            StoreOperation::Upload => StorageError::upload_failed("injected failure"),
            StoreOperation::Delete => StorageError::delete_failed("injected failure"),
        })
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket_name(&self, bucket: Bucket) -> &str {
        self.buckets.name(bucket)
    }

    async fn download_file(&self, bucket: Bucket, key: &str, path: &Path) -> StorageResult<u64> {
        self.check(StoreOperation::Download)?;

        let data = self
            .get(bucket, key)
            .ok_or_else(|| StorageError::not_found(self.buckets.name(bucket), key))?;

        tokio::fs::write(path, &data).await?;
        Ok(data.len() as u64)
    }

    async fn upload_file(&self, bucket: Bucket, key: &str, path: &Path) -> StorageResult<u64> {
        self.check(StoreOperation::Upload)?;

        let data = tokio::fs::read(path).await?;
        let size = data.len() as u64;
        self.put(bucket, key, data);
        Ok(size)
    }

    async fn delete_object(&self, bucket: Bucket, key: &str) -> StorageResult<()> {
        self.check(StoreOperation::Delete)?;
        self.lock_objects().remove(&(bucket, key.to_string()));
        Ok(())
    }
}
