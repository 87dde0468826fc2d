//! Shared data models for the ingest pipeline.
//!
//! This crate provides:
//! - The job message wire format and its decoder
//! - Artifact key derivation from object URLs
//! - Pipeline stages and job outcomes

pub mod artifact;
pub mod error;
pub mod job;
pub mod outcome;

pub use artifact::{artifact_url, ArtifactKey};
pub use error::{DecodeError, DecodeResult};
pub use job::{JobDescriptor, JobId, JobMessage};
pub use outcome::{JobOutcome, PipelineStage};
