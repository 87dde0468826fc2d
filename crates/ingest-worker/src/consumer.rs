//! Forwarding loop from the broker into the dispatcher's channel.
//!
//! A channel slot is reserved before anything is read from the broker. While
//! every worker is busy and the channel is full the loop waits on the
//! reservation, so further messages stay in the stream where other worker
//! processes can take them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use ingest_queue::{Delivery, JobQueue, QueueResult};

use crate::metrics;
use crate::retry::FailureTracker;

/// Where deliveries come from.
#[async_trait]
pub trait DeliverySource: Send + Sync {
    /// Read at most one new delivery, waiting up to `block` for one to arrive.
    async fn fetch(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>>;

    /// Take over at most one delivery abandoned by another consumer.
    async fn claim(&self, consumer: &str, min_idle: Duration) -> QueueResult<Option<Delivery>>;
}

#[async_trait]
impl DeliverySource for Arc<JobQueue> {
    async fn fetch(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        Ok(self.consume(consumer, block, 1).await?.into_iter().next())
    }

    async fn claim(&self, consumer: &str, min_idle: Duration) -> QueueResult<Option<Delivery>> {
        Ok(self
            .claim_pending(consumer, min_idle, 1)
            .await?
            .into_iter()
            .next())
    }
}

/// Consumer loop settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer name within the group
    pub name: String,
    /// How long one read blocks when the stream is empty
    pub poll_block: Duration,
    /// How often to look for abandoned deliveries
    pub claim_interval: Duration,
    /// Idle time after which a pending delivery counts as abandoned
    pub claim_min_idle: Duration,
    /// Pause after a failed broker call
    pub error_backoff: Duration,
}

impl ConsumerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poll_block: Duration::from_millis(1000),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(900),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Reads deliveries and hands them to the dispatcher.
pub struct Consumer<S> {
    source: S,
    config: ConsumerConfig,
}

impl<S: DeliverySource> Consumer<S> {
    pub fn new(source: S, config: ConsumerConfig) -> Self {
        Self { source, config }
    }

    /// Forward deliveries until `shutdown` flips to `true` or the dispatcher
    /// goes away. Returns the number of deliveries forwarded.
    ///
    /// The sender is dropped on return, which lets the dispatcher drain and stop.
    pub async fn run(
        self,
        sender: mpsc::Sender<Delivery>,
        mut shutdown: watch::Receiver<bool>,
    ) -> u64 {
        info!("Consumer '{}' started", self.config.name);

        let mut forwarded = 0u64;
        let mut failures = FailureTracker::new(3);
        // Look for abandoned deliveries right away on startup.
        let mut next_claim = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                permit = sender.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!("Dispatcher channel closed");
                        break;
                    }
                },
            };

            let claim_due = Instant::now() >= next_claim;
            let result = if claim_due {
                match self
                    .source
                    .claim(&self.config.name, self.config.claim_min_idle)
                    .await
                {
                    Ok(Some(delivery)) => Ok(Some((delivery, "claimed"))),
                    Ok(None) => {
                        next_claim = Instant::now() + self.config.claim_interval;
                        self.fetch().await
                    }
                    Err(e) => {
                        next_claim = Instant::now() + self.config.claim_interval;
                        Err(e)
                    }
                }
            } else {
                self.fetch().await
            };

            match result {
                Ok(Some((delivery, origin))) => {
                    failures.record_success();
                    metrics::record_delivery(origin);
                    debug!(delivery_id = %delivery.id(), origin, "Forwarding delivery");
                    permit.send(delivery);
                    forwarded += 1;
                }
                Ok(None) => failures.record_success(),
                Err(e) => {
                    drop(permit);
                    if failures.record_failure() {
                        error!("Failed to read from queue: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        info!(
            "Consumer '{}' stopped after forwarding {} deliveries",
            self.config.name, forwarded
        );
        forwarded
    }

    async fn fetch(&self) -> QueueResult<Option<(Delivery, &'static str)>> {
        Ok(self
            .source
            .fetch(&self.config.name, self.config.poll_block)
            .await?
            .map(|delivery| (delivery, "new")))
    }
}
