//! Integration tests for the Redis Streams binding.
//!
//! These tests require a running Redis server and the `REDIS_URL` environment
//! variable to be set. Run with:
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" cargo test -p tracker-broker --test integration -- --ignored --nocapture
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tracker_broker::{Publisher, RedisPublisher, RedisSubscriber, Subscriber};
use tracker_common::config::BrokerConfig;
use tracker_common::redis_pool::create_redis_pool;
use tracker_common::types::{Envelope, MessageKind};

/// Broker config on a throwaway topic so runs never see each other's entries.
fn test_config(consumer: &str) -> BrokerConfig {
    config_on_topic(&format!("test.email.{}", uuid::Uuid::new_v4().simple()), consumer)
}

fn config_on_topic(topic: &str, consumer: &str) -> BrokerConfig {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let topic = topic.to_string();

    let vars: HashMap<String, String> = HashMap::from([
        ("REDIS_URL".to_string(), redis_url),
        ("BROKER_TOPIC_EMAIL_SENDING".to_string(), topic),
        ("BROKER_CONSUMER_NAME".to_string(), consumer.to_string()),
        ("BROKER_PARTITIONS".to_string(), "2".to_string()),
        ("BROKER_MAX_WAIT_MS".to_string(), "200".to_string()),
        ("BROKER_CLAIM_IDLE_MS".to_string(), "100".to_string()),
    ]);
    BrokerConfig::from_lookup(&|k| vars.get(k).cloned()).unwrap()
}

fn welcome(to: &str) -> Envelope {
    Envelope::new(MessageKind::Welcome, to, "Hi", "Body", BTreeMap::new()).unwrap()
}

#[tokio::test]
#[ignore] // Requires REDIS_URL - run explicitly with --ignored
async fn test_publish_fetch_commit_round_trip() {
    let config = test_config("it-consumer");
    let publisher = RedisPublisher::start(create_redis_pool(&config.redis_url).await.unwrap(), &config);

    let mut subscriber =
        RedisSubscriber::connect(create_redis_pool(&config.redis_url).await.unwrap(), &config)
            .await
            .unwrap();

    publisher.publish(&welcome("a@example.com")).await.unwrap();
    publisher.publish(&welcome("a@example.com")).await.unwrap();

    let cancel = CancellationToken::new();
    let first = tokio::time::timeout(Duration::from_secs(5), subscriber.fetch(&cancel))
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), subscriber.fetch(&cancel))
        .await
        .unwrap()
        .unwrap();

    // Same recipient, same stream, publish order preserved
    assert_eq!(first.partition, second.partition);
    assert_eq!(first.key.as_deref(), Some("a@example.com"));
    assert_eq!(
        Envelope::decode(&first.payload).unwrap().recipient(),
        "a@example.com"
    );

    subscriber.commit(&first).await.unwrap();
    subscriber.commit(&second).await.unwrap();
    subscriber.close().await;
    publisher.close().await;
}

#[tokio::test]
#[ignore] // Requires REDIS_URL - run explicitly with --ignored
async fn test_uncommitted_entry_redelivered_after_restart() {
    let config = test_config("it-restart");
    let publisher = RedisPublisher::start(create_redis_pool(&config.redis_url).await.unwrap(), &config);
    publisher.publish(&welcome("b@example.com")).await.unwrap();

    let cancel = CancellationToken::new();
    let mut subscriber =
        RedisSubscriber::connect(create_redis_pool(&config.redis_url).await.unwrap(), &config)
            .await
            .unwrap();
    let delivered = subscriber.fetch(&cancel).await.unwrap();
    // Simulated crash: close without committing
    subscriber.close().await;

    let mut restarted =
        RedisSubscriber::connect(create_redis_pool(&config.redis_url).await.unwrap(), &config)
            .await
            .unwrap();
    let redelivered = tokio::time::timeout(Duration::from_secs(5), restarted.fetch(&cancel))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(redelivered.offset, delivered.offset);
    restarted.commit(&redelivered).await.unwrap();
    publisher.close().await;
}

#[tokio::test]
#[ignore] // Requires REDIS_URL - run explicitly with --ignored
async fn test_entry_abandoned_by_one_consumer_is_claimed_by_another() {
    let topic = format!("test.email.{}", uuid::Uuid::new_v4().simple());
    let config_a = config_on_topic(&topic, "it-consumer-a");
    let config_b = config_on_topic(&topic, "it-consumer-b");

    let publisher =
        RedisPublisher::start(create_redis_pool(&config_a.redis_url).await.unwrap(), &config_a);
    publisher.publish(&welcome("d@example.com")).await.unwrap();

    let cancel = CancellationToken::new();
    let mut first =
        RedisSubscriber::connect(create_redis_pool(&config_a.redis_url).await.unwrap(), &config_a)
            .await
            .unwrap();
    let abandoned = tokio::time::timeout(Duration::from_secs(5), first.fetch(&cancel))
        .await
        .unwrap()
        .unwrap();
    // Crash without committing; this consumer name never comes back
    first.close().await;

    let mut second =
        RedisSubscriber::connect(create_redis_pool(&config_b.redis_url).await.unwrap(), &config_b)
            .await
            .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let claimed = tokio::time::timeout(Duration::from_secs(5), second.fetch(&cancel))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.offset, abandoned.offset);
    assert_eq!(claimed.partition, abandoned.partition);
    assert_eq!(
        Envelope::decode(&claimed.payload).unwrap().recipient(),
        "d@example.com"
    );

    second.commit(&claimed).await.unwrap();
    publisher.close().await;
}

#[tokio::test]
#[ignore] // Requires REDIS_URL - run explicitly with --ignored
async fn test_idle_fetch_observes_cancellation() {
    let config = test_config("it-cancel");
    let mut subscriber =
        RedisSubscriber::connect(create_redis_pool(&config.redis_url).await.unwrap(), &config)
            .await
            .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), subscriber.fetch(&cancel))
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
#[ignore] // Requires REDIS_URL - run explicitly with --ignored
async fn test_publish_after_close_is_refused() {
    let config = test_config("it-closed");
    let publisher = RedisPublisher::start(create_redis_pool(&config.redis_url).await.unwrap(), &config);
    publisher.close().await;

    assert!(publisher.publish(&welcome("c@example.com")).await.is_err());
}
