//! Job queue using Redis Streams.
//!
//! The queue is one stream shared by a consumer group. Reading through the
//! group moves a message into the group's pending list, where it stays until
//! it is acknowledged; a consumer that dies leaves its messages pending and
//! another consumer reclaims them after `claim_pending`'s idle threshold.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use ingest_models::JobMessage;

use crate::delivery::{Acknowledger, Delivery};
use crate::error::{QueueError, QueueResult};

/// Stream entry field carrying the job payload.
const PAYLOAD_FIELD: &str = "job";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Exchange name, the stream namespace
    pub exchange: String,
    /// Queue name, also the routing key publishers use
    pub queue_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Stream receiving rejected messages; rejected messages are dropped when unset
    pub dead_letter_stream: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            exchange: "events".to_string(),
            queue_name: "uploaded".to_string(),
            consumer_group: "workers".to_string(),
            dead_letter_stream: None,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            exchange: std::env::var("QUEUE_EXCHANGE").unwrap_or(defaults.exchange),
            queue_name: std::env::var("QUEUE_NAME").unwrap_or(defaults.queue_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dead_letter_stream: std::env::var("QUEUE_DLQ_STREAM")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Stream key of the queue: `<exchange>:<queue>`.
    pub fn stream_key(&self) -> String {
        format!("{}:{}", self.exchange, self.queue_name)
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
    stream_key: String,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let stream_key = config.stream_key();
        Ok(Self {
            client,
            config,
            stream_key,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Check that Redis answers.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self
            .connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(())
    }

    /// Initialize the queue (create stream and consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Start at 0 so messages published before the first worker came up are consumed.
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(
                "Created consumer group {} on {}",
                self.config.consumer_group, self.stream_key
            ),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Publish a job message. Returns the stream message id.
    pub async fn publish(&self, message: &JobMessage) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = message.to_json()?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let message_id: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .arg("content_type")
            .arg("application/json")
            .arg("ts")
            .arg(&timestamp)
            .query_async(&mut conn)
            .await?;

        info!("Published job {} with message ID {}", message.id, message_id);
        Ok(message_id)
    }

    /// Read up to `count` new messages for `consumer_name`, blocking up to
    /// `block` when the stream is empty.
    ///
    /// Bodies are returned as-is; decoding is the caller's job.
    pub async fn consume(
        self: &Arc<Self>,
        consumer_name: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let deliveries: Vec<Delivery> = result
            .keys
            .into_iter()
            .flat_map(|stream_key| stream_key.ids)
            .map(|entry| self.to_delivery(entry))
            .collect();

        if !deliveries.is_empty() {
            debug!("Consumed {} messages from {}", deliveries.len(), self.stream_key);
        }

        Ok(deliveries)
    }

    /// Claim pending messages that have been idle for at least `min_idle`.
    /// This handles messages from crashed consumers.
    pub async fn claim_pending(
        self: &Arc<Self>,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count.saturating_mul(10).max(1))
            .query_async(&mut conn)
            .await?;

        let idle_ids: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .take(count)
            .map(|p| p.id)
            .collect();

        if idle_ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM re-checks the idle time, so a concurrent claimer wins at most once.
        let claimed: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg(&idle_ids)
            .query_async(&mut conn)
            .await?;

        let deliveries: Vec<Delivery> = claimed
            .ids
            .into_iter()
            .map(|entry| self.to_delivery(entry).redelivered())
            .collect();

        if !deliveries.is_empty() {
            info!("Claimed {} pending messages", deliveries.len());
        }

        Ok(deliveries)
    }

    fn to_delivery(self: &Arc<Self>, entry: redis::streams::StreamId) -> Delivery {
        let body = match entry.map.get(PAYLOAD_FIELD) {
            Some(redis::Value::BulkString(payload)) => payload.clone(),
            Some(redis::Value::SimpleString(payload)) => payload.clone().into_bytes(),
            _ => {
                warn!("Message {} has no {} field", entry.id, PAYLOAD_FIELD);
                Vec::new()
            }
        };

        let acker: Arc<dyn Acknowledger> = self.clone();
        Delivery::new(entry.id, body, acker)
    }

    /// Acknowledge a message and delete it from the stream.
    async fn acknowledge(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let acked: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.stream_key)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        if acked == 0 {
            return Err(QueueError::ack_failed(format!(
                "message {} was not pending in group {}",
                message_id, self.config.consumer_group
            )));
        }

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Get queue length (messages still in the stream, pending ones included).
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.stream_key).await?;
        Ok(len)
    }

    /// Number of delivered but unacknowledged messages.
    pub async fn pending_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;
        Ok(pending.count() as u64)
    }

    /// Get dead-letter stream length, zero when no dead-letter stream is configured.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let Some(dlq) = &self.config.dead_letter_stream else {
            return Ok(0);
        };
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(dlq).await?;
        Ok(len)
    }
}

#[async_trait]
impl Acknowledger for JobQueue {
    async fn ack(&self, delivery_id: &str) -> QueueResult<()> {
        self.acknowledge(delivery_id).await
    }

    async fn reject(&self, delivery_id: &str, body: &[u8], reason: &str) -> QueueResult<()> {
        if let Some(dlq) = &self.config.dead_letter_stream {
            let mut conn = self.connection().await?;
            redis::cmd("XADD")
                .arg(dlq)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(body)
                .arg("error")
                .arg(reason)
                .arg("original_id")
                .arg(delivery_id)
                .query_async::<()>(&mut conn)
                .await?;
            warn!("Moved message {} to {}: {}", delivery_id, dlq, reason);
        } else {
            warn!("Rejected message {}: {}", delivery_id, reason);
        }

        self.acknowledge(delivery_id).await
    }
}
