//! Object storage for ingest artifacts.
//!
//! This crate provides:
//! - The `ObjectStore` trait over the `source` and `processed` buckets
//! - An S3-compatible client (MinIO, path-style addressing)
//! - An in-memory store for tests and local runs

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryStore, StoreOperation};
pub use store::{Bucket, BucketNames, ObjectStore};
