//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job publishing onto a durable stream
//! - Consumer-group reads with explicit acknowledgment
//! - Negative acknowledgment without requeue (optional dead-letter stream)
//! - Reclaiming deliveries left pending by crashed consumers

pub mod delivery;
pub mod error;
pub mod queue;

pub use delivery::{Acknowledger, Delivery};
pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueConfig};
