//! In-process broker.
//!
//! A single append-only log shared by a publisher handle and any number of
//! independent subscribers (each keeps its own cursor, like a consumer group of
//! one). Used by the unit tests of every crate and handy for local runs without
//! Redis. Failures can be scripted per recipient to exercise error paths.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use tracker_common::types::Envelope;

use crate::client::{Delivery, Publisher, Subscriber};
use crate::error::{CommitError, FetchError, PublishError};
use crate::partition::partition_for;

#[derive(Debug, Clone)]
struct Record {
    partition: u32,
    offset: u64,
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct State {
    log: Vec<Record>,
    committed: BTreeSet<u64>,
    commit_attempts: usize,
    failing_recipients: HashSet<String>,
    failing_commits: usize,
}

pub struct InMemoryBroker {
    partitions: u32,
    state: Mutex<State>,
    appended: Notify,
}

impl InMemoryBroker {
    pub fn new(partitions: u32) -> Arc<Self> {
        Arc::new(Self {
            partitions: partitions.max(1),
            state: Mutex::new(State::default()),
            appended: Notify::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge every other assertion.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append raw bytes under `key`, bypassing envelope encoding.
    pub fn publish_raw(&self, key: &str, payload: impl Into<Vec<u8>>) -> u64 {
        let offset = {
            let mut state = self.state();
            let offset = state.log.len() as u64;
            state.log.push(Record {
                partition: partition_for(key, self.partitions),
                offset,
                key: Some(key.to_string()),
                payload: payload.into(),
            });
            offset
        };
        self.appended.notify_waiters();
        offset
    }

    /// Make every publish addressed to `recipient` fail with a connection error.
    pub fn fail_publishes_to(&self, recipient: &str) {
        self.state().failing_recipients.insert(recipient.to_string());
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: usize) {
        self.state().failing_commits = n;
    }

    /// Envelopes in publish order; undecodable records are skipped.
    pub fn published(&self) -> Vec<Envelope> {
        self.state()
            .log
            .iter()
            .filter_map(|r| Envelope::decode(&r.payload).ok())
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.state().log.len()
    }

    /// Partition a record was written to.
    pub fn partition_of(&self, offset: u64) -> Option<u32> {
        self.state()
            .log
            .get(offset as usize)
            .map(|r| r.partition)
    }

    pub fn is_committed(&self, offset: u64) -> bool {
        self.state().committed.contains(&offset)
    }

    pub fn committed_count(&self) -> usize {
        self.state().committed.len()
    }

    /// Every commit call, successful or not.
    pub fn commit_attempts(&self) -> usize {
        self.state().commit_attempts
    }

    pub fn subscriber(self: &Arc<Self>) -> InMemorySubscriber {
        InMemorySubscriber {
            broker: Arc::clone(self),
            cursor: 0,
            closed: false,
        }
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError> {
        if self
            .state()
            .failing_recipients
            .contains(envelope.recipient())
        {
            return Err(PublishError::Connection(format!(
                "scripted failure for {}",
                envelope.recipient()
            )));
        }
        let payload = envelope.encode()?;
        self.publish_raw(envelope.recipient(), payload);
        Ok(())
    }
}

pub struct InMemorySubscriber {
    broker: Arc<InMemoryBroker>,
    cursor: usize,
    closed: bool,
}

impl InMemorySubscriber {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn next_record(&mut self) -> Option<Record> {
        let record = self.broker.state().log.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
        }
        record
    }
}

#[async_trait]
impl Subscriber for InMemorySubscriber {
    async fn fetch(&mut self, cancel: &CancellationToken) -> Result<Delivery, FetchError> {
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            // Register interest before checking the log so an append between
            // the check and the await still wakes us.
            let broker = Arc::clone(&self.broker);
            let appended = broker.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(record) = self.next_record() {
                return Ok(Delivery {
                    partition: record.partition.to_string(),
                    offset: record.offset.to_string(),
                    key: record.key,
                    payload: record.payload,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = &mut appended => {}
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), CommitError> {
        let unknown = || CommitError::UnknownDelivery {
            partition: delivery.partition.clone(),
            offset: delivery.offset.clone(),
        };
        let offset: u64 = delivery.offset.parse().map_err(|_| unknown())?;

        let mut state = self.broker.state();
        state.commit_attempts += 1;
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(CommitError::Connection("scripted commit failure".to_string()));
        }
        if offset as usize >= state.log.len() {
            return Err(unknown());
        }
        state.committed.insert(offset);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tracker_common::types::MessageKind;

    fn envelope(to: &str) -> Envelope {
        Envelope::new(MessageKind::Welcome, to, "Hi", "Body", BTreeMap::new()).unwrap()
    }

    #[tokio::test]
    async fn test_publish_then_fetch_in_order() {
        let broker = InMemoryBroker::new(4);
        broker.publish(&envelope("a@example.com")).await.unwrap();
        broker.publish(&envelope("b@example.com")).await.unwrap();

        let mut sub = broker.subscriber();
        let cancel = CancellationToken::new();
        let first = sub.fetch(&cancel).await.unwrap();
        let second = sub.fetch(&cancel).await.unwrap();

        assert_eq!(first.key.as_deref(), Some("a@example.com"));
        assert_eq!(second.key.as_deref(), Some("b@example.com"));
        assert_eq!(
            Envelope::decode(&first.payload).unwrap().recipient(),
            "a@example.com"
        );
    }

    #[tokio::test]
    async fn test_same_recipient_same_partition() {
        let broker = InMemoryBroker::new(8);
        let first = broker.publish_raw("a@example.com", b"1".to_vec());
        let second = broker.publish_raw("a@example.com", b"2".to_vec());
        assert_eq!(broker.partition_of(first), broker.partition_of(second));
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_publish() {
        let broker = InMemoryBroker::new(1);
        let mut sub = broker.subscriber();
        let cancel = CancellationToken::new();

        let publisher = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish_raw("late@example.com", b"{}".to_vec());
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.fetch(&cancel))
            .await
            .expect("fetch should wake up")
            .unwrap();
        assert_eq!(delivery.key.as_deref(), Some("late@example.com"));
    }

    #[tokio::test]
    async fn test_each_append_wakes_a_blocked_fetch() {
        let broker = InMemoryBroker::new(2);
        let mut sub = broker.subscriber();
        let cancel = CancellationToken::new();

        let publisher = Arc::clone(&broker);
        tokio::spawn(async move {
            for to in ["a@example.com", "b@example.com", "c@example.com"] {
                tokio::time::sleep(Duration::from_millis(10)).await;
                publisher.publish_raw(to, b"{}".to_vec());
            }
        });

        let mut keys = Vec::new();
        for _ in 0..3 {
            let delivery = tokio::time::timeout(Duration::from_secs(2), sub.fetch(&cancel))
                .await
                .expect("fetch should wake up for every append")
                .unwrap();
            keys.push(delivery.key.unwrap());
        }
        assert_eq!(keys, vec!["a@example.com", "b@example.com", "c@example.com"]);
    }

    #[tokio::test]
    async fn test_fetch_cancelled_while_idle() {
        let broker = InMemoryBroker::new(1);
        let mut sub = broker.subscriber();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = sub.fetch(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_commit_and_scripted_failures() {
        let broker = InMemoryBroker::new(1);
        broker.publish_raw("a@example.com", b"x".to_vec());
        broker.fail_next_commits(1);

        let mut sub = broker.subscriber();
        let delivery = sub.fetch(&CancellationToken::new()).await.unwrap();

        assert!(sub.commit(&delivery).await.is_err());
        assert!(!broker.is_committed(0));
        sub.commit(&delivery).await.unwrap();
        assert!(broker.is_committed(0));
        assert_eq!(broker.commit_attempts(), 2);
    }

    #[tokio::test]
    async fn test_scripted_publish_failure() {
        let broker = InMemoryBroker::new(1);
        broker.fail_publishes_to("down@example.com");
        assert!(broker.publish(&envelope("down@example.com")).await.is_err());
        assert!(broker.publish(&envelope("up@example.com")).await.is_ok());
        assert_eq!(broker.published_count(), 1);
    }
}
