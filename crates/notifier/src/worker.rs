//! Delivery worker: the consume loop between the broker and the mail transport.
//!
//! Each message is fetched, decoded, rendered, sent and then committed. The
//! commit happens whatever the outcome of the earlier steps, so a message that
//! cannot be decoded or delivered is dropped after logging instead of blocking
//! its partition. Cancellation is only observed while waiting for a message; a
//! message already fetched is always carried through to its commit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use tracker_broker::{Delivery, Subscriber};
use tracker_common::config::WorkerConfig;
use tracker_common::types::Envelope;

use crate::mailer::Mailer;
use crate::render::{display_name, render_html};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Processing,
    Committing,
    Exiting,
}

/// Counters accumulated over one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub sent: u64,
    pub send_failures: u64,
    pub decode_failures: u64,
    pub commit_failures: u64,
}

pub struct DeliveryWorker<S: Subscriber> {
    subscriber: S,
    mailer: Arc<dyn Mailer>,
    fetch_retry: Duration,
    state: watch::Sender<WorkerState>,
    stats: WorkerStats,
}

impl<S: Subscriber> DeliveryWorker<S> {
    pub fn new(subscriber: S, mailer: Arc<dyn Mailer>, config: &WorkerConfig) -> Self {
        Self {
            subscriber,
            mailer,
            fetch_retry: config.fetch_retry,
            state: watch::Sender::new(WorkerState::Idle),
            stats: WorkerStats::default(),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Consume until `cancel` fires, then close the subscriber.
    pub async fn run(&mut self, cancel: &CancellationToken) -> WorkerStats {
        tracing::info!("Delivery worker started");

        loop {
            self.set_state(WorkerState::Fetching);
            let delivery = match self.subscriber.fetch(cancel).await {
                Ok(delivery) => delivery,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?self.fetch_retry, "Fetch failed");
                    self.set_state(WorkerState::Idle);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.fetch_retry) => continue,
                    }
                }
            };
            self.stats.received += 1;

            self.set_state(WorkerState::Processing);
            self.process(&delivery).await;

            self.set_state(WorkerState::Committing);
            if let Err(e) = self.subscriber.commit(&delivery).await {
                self.stats.commit_failures += 1;
                tracing::error!(
                    stream = %delivery.partition,
                    entry_id = %delivery.offset,
                    error = %e,
                    "Commit failed"
                );
            }
            self.set_state(WorkerState::Idle);
        }

        self.set_state(WorkerState::Exiting);
        self.subscriber.close().await;
        tracing::info!(
            received = self.stats.received,
            sent = self.stats.sent,
            send_failures = self.stats.send_failures,
            decode_failures = self.stats.decode_failures,
            commit_failures = self.stats.commit_failures,
            "Delivery worker stopped"
        );
        self.stats.clone()
    }

    async fn process(&mut self, delivery: &Delivery) {
        let envelope = match Envelope::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.decode_failures += 1;
                tracing::error!(
                    stream = %delivery.partition,
                    entry_id = %delivery.offset,
                    error = %e,
                    "Dropping undecodable message"
                );
                return;
            }
        };

        let html = render_html(&envelope);
        let result = self
            .mailer
            .send(
                envelope.recipient(),
                display_name(&envelope),
                envelope.subject(),
                envelope.plain_body(),
                &html,
            )
            .await;

        match result {
            Ok(()) => self.stats.sent += 1,
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::error!(
                    recipient = %envelope.recipient(),
                    kind = envelope.kind().as_str(),
                    error_kind = e.kind(),
                    error = %e,
                    "Delivery failed, message dropped"
                );
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}
