//! Redis queue integration tests.
//!
//! Each test uses its own exchange so runs do not see each other's messages.

use std::sync::Arc;
use std::time::Duration;

use ingest_models::JobMessage;
use ingest_queue::{JobQueue, QueueConfig};

fn test_queue(tag: &str, dead_letter: bool) -> Arc<JobQueue> {
    dotenvy::dotenv().ok();

    let exchange = format!("test-{}-{}", tag, std::process::id());
    let config = QueueConfig {
        exchange: exchange.clone(),
        dead_letter_stream: dead_letter.then(|| format!("{exchange}:dead")),
        ..QueueConfig::from_env()
    };
    Arc::new(JobQueue::new(config).expect("Failed to create queue"))
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let queue = test_queue("ping", false);
    queue.ping().await.expect("Redis did not answer");
    queue.init().await.expect("Failed to initialize queue");
    // Second init hits BUSYGROUP and must still succeed
    queue.init().await.expect("Re-initialization failed");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_consume_ack() {
    let queue = test_queue("ack", false);
    queue.init().await.expect("Failed to initialize queue");

    let message = JobMessage::new(42, "http://store:9000/uploaded/cat.jpg");
    queue.publish(&message).await.expect("Failed to publish");
    assert_eq!(queue.len().await.unwrap(), 1);

    let deliveries = queue
        .consume("test-consumer", Duration::from_millis(1000), 1)
        .await
        .expect("Failed to consume");
    assert_eq!(deliveries.len(), 1);

    let delivery = deliveries.into_iter().next().unwrap();
    assert!(!delivery.is_redelivered());
    let decoded: JobMessage = serde_json::from_slice(delivery.body()).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(queue.pending_len().await.unwrap(), 1);

    delivery.ack().await.expect("Failed to ack");
    assert_eq!(queue.pending_len().await.unwrap(), 0);
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_nack_drops_message() {
    let queue = test_queue("nack", false);
    queue.init().await.expect("Failed to initialize queue");

    queue
        .publish(&JobMessage::new(7, "http://store:9000/uploaded/missing.jpg"))
        .await
        .expect("Failed to publish");

    let delivery = queue
        .consume("test-consumer", Duration::from_millis(1000), 1)
        .await
        .expect("Failed to consume")
        .pop()
        .expect("No delivery");
    delivery.nack("download failed").await.expect("Failed to nack");

    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.dlq_len().await.unwrap(), 0);

    let again = queue
        .consume("test-consumer", Duration::from_millis(200), 1)
        .await
        .expect("Failed to consume");
    assert!(again.is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_nack_with_dead_letter_stream() {
    let queue = test_queue("dlq", true);
    queue.init().await.expect("Failed to initialize queue");

    queue
        .publish(&JobMessage::new(8, "http://store:9000/uploaded/bad.jpg"))
        .await
        .expect("Failed to publish");

    let delivery = queue
        .consume("test-consumer", Duration::from_millis(1000), 1)
        .await
        .expect("Failed to consume")
        .pop()
        .expect("No delivery");
    delivery.nack("transform failed").await.expect("Failed to nack");

    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_claim_abandoned_delivery() {
    let queue = test_queue("claim", false);
    queue.init().await.expect("Failed to initialize queue");

    queue
        .publish(&JobMessage::new(9, "http://store:9000/uploaded/dog.jpg"))
        .await
        .expect("Failed to publish");

    // First consumer takes the message and goes away without resolving it
    let abandoned = queue
        .consume("crashed-consumer", Duration::from_millis(1000), 1)
        .await
        .expect("Failed to consume");
    assert_eq!(abandoned.len(), 1);
    drop(abandoned);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let claimed = queue
        .claim_pending("rescuer", Duration::from_millis(100), 10)
        .await
        .expect("Failed to claim");
    assert_eq!(claimed.len(), 1);

    let delivery = claimed.into_iter().next().unwrap();
    assert!(delivery.is_redelivered());
    delivery.ack().await.expect("Failed to ack");
    assert_eq!(queue.pending_len().await.unwrap(), 0);
}
