//! Deliveries and their acknowledgment.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::QueueResult;

/// Resolves deliveries against the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Positive acknowledgment: the message is removed permanently.
    async fn ack(&self, delivery_id: &str) -> QueueResult<()>;

    /// Negative acknowledgment without requeue: the message is removed and
    /// never redelivered.
    async fn reject(&self, delivery_id: &str, body: &[u8], reason: &str) -> QueueResult<()>;
}

/// One message handed out by the broker, owned by the consumer until it is
/// resolved.
///
/// `ack` and `nack` consume the delivery, so each delivery is resolved at
/// most once. A delivery dropped unresolved stays pending in the broker and
/// is eventually reclaimed.
pub struct Delivery {
    id: String,
    body: Vec<u8>,
    redelivered: bool,
    acker: Arc<dyn Acknowledger>,
    resolved: bool,
}

impl Delivery {
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            redelivered: false,
            acker,
            resolved: false,
        }
    }

    /// Mark the delivery as reclaimed from another consumer.
    pub fn redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }

    /// Broker message id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge successful processing.
    pub async fn ack(mut self) -> QueueResult<()> {
        self.resolved = true;
        self.acker.ack(&self.id).await
    }

    /// Reject without requeue.
    pub async fn nack(mut self, reason: &str) -> QueueResult<()> {
        self.resolved = true;
        self.acker.reject(&self.id, &self.body, reason).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(
                delivery_id = %self.id,
                "Delivery dropped without acknowledgment, it stays pending"
            );
        }
    }
}
