//! Consumer backpressure, crash-recovery claims and shutdown.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use ingest_queue::{Delivery, QueueError, QueueResult};
use ingest_worker::{Consumer, ConsumerConfig, DeliverySource};

use common::RecordingAcker;

/// Source with an endless supply of messages. Clones share state.
#[derive(Clone)]
struct FakeSource(Arc<SourceState>);

struct SourceState {
    acker: Arc<RecordingAcker>,
    fetches: AtomicUsize,
    claims: AtomicUsize,
    abandoned: AtomicBool,
    failing: AtomicBool,
}

impl FakeSource {
    fn new() -> Self {
        Self(Arc::new(SourceState {
            acker: Arc::new(RecordingAcker::default()),
            fetches: AtomicUsize::new(0),
            claims: AtomicUsize::new(0),
            abandoned: AtomicBool::new(false),
            failing: AtomicBool::new(false),
        }))
    }

    fn fetches(&self) -> usize {
        self.0.fetches.load(Ordering::SeqCst)
    }

    fn claims(&self) -> usize {
        self.0.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliverySource for FakeSource {
    async fn fetch(&self, _consumer: &str, _block: Duration) -> QueueResult<Option<Delivery>> {
        let n = self.0.fetches.fetch_add(1, Ordering::SeqCst);
        if self.0.failing.load(Ordering::SeqCst) {
            return Err(QueueError::connection_failed("connection refused"));
        }
        Ok(Some(Delivery::new(
            format!("{n}-0"),
            b"{}".to_vec(),
            self.0.acker.clone(),
        )))
    }

    async fn claim(&self, _consumer: &str, _min_idle: Duration) -> QueueResult<Option<Delivery>> {
        self.0.claims.fetch_add(1, Ordering::SeqCst);
        if self.0.abandoned.swap(false, Ordering::SeqCst) {
            return Ok(Some(
                Delivery::new("0-1", b"{}".to_vec(), self.0.acker.clone()).redelivered(),
            ));
        }
        Ok(None)
    }
}

fn config() -> ConsumerConfig {
    ConsumerConfig {
        poll_block: Duration::from_millis(10),
        claim_interval: Duration::from_secs(3600),
        claim_min_idle: Duration::from_secs(60),
        error_backoff: Duration::from_millis(10),
        ..ConsumerConfig::new("test-consumer")
    }
}

#[tokio::test]
async fn test_consumer_does_not_read_while_channel_is_full() {
    let source = FakeSource::new();
    let (sender, mut receiver) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = Consumer::new(source.clone(), config());
    let handle = tokio::spawn(consumer.run(sender, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    // One message fills the channel; the next read waits for a free slot.
    assert_eq!(source.fetches(), 1);

    let first = receiver.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.fetches(), 2);
    first.ack().await.unwrap();

    shutdown_tx.send(true).unwrap();
    let forwarded = handle.await.unwrap();
    assert_eq!(forwarded, 2);
}

#[tokio::test]
async fn test_consumer_claims_abandoned_delivery_first() {
    let source = FakeSource::new();
    source.0.abandoned.store(true, Ordering::SeqCst);

    let (sender, mut receiver) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Consumer::new(source.clone(), config()).run(sender, shutdown_rx));

    let claimed = receiver.recv().await.unwrap();
    assert_eq!(claimed.id(), "0-1");
    assert!(claimed.is_redelivered());

    let fresh = receiver.recv().await.unwrap();
    assert!(!fresh.is_redelivered());
    // Nothing else was abandoned, so the next claim waits for the interval.
    assert_eq!(source.claims(), 2);

    shutdown_tx.send(true).unwrap();
    drop(receiver);
    handle.await.unwrap();
    claimed.ack().await.unwrap();
    fresh.ack().await.unwrap();
}

#[tokio::test]
async fn test_consumer_keeps_polling_after_broker_errors() {
    let source = FakeSource::new();
    source.0.failing.store(true, Ordering::SeqCst);

    let (sender, mut receiver) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Consumer::new(source.clone(), config()).run(sender, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(source.fetches() > 1);
    assert!(receiver.try_recv().is_err());

    source.0.failing.store(false, Ordering::SeqCst);
    let delivery = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("consumer did not recover")
        .unwrap();
    delivery.ack().await.unwrap();

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_consumer_stops_when_dispatcher_is_gone() {
    let source = FakeSource::new();
    let (sender, receiver) = mpsc::channel(1);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    drop(receiver);

    let forwarded = tokio::time::timeout(
        Duration::from_secs(1),
        Consumer::new(source.clone(), config()).run(sender, shutdown_rx),
    )
    .await
    .expect("consumer kept running without a receiver");

    assert_eq!(forwarded, 0);
    assert_eq!(source.fetches(), 0);
}
