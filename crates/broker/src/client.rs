use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tracker_common::types::Envelope;

use crate::error::{CommitError, FetchError, PublishError};

/// Producer role of the broker client.
///
/// `publish` returns once the broker has durably accepted the envelope, or with
/// an error. It is keyed by `envelope.recipient()` so every message for one
/// address is consumed in publish order. Implementations never retry.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError> {
        (**self).publish(envelope).await
    }
}

/// One message handed out by a [`Subscriber`], not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Partition (stream) the message was read from
    pub partition: String,
    /// Broker-assigned position inside the partition
    pub offset: String,
    /// Partition key the producer used (the recipient)
    pub key: Option<String>,
    /// Raw envelope bytes; decoding is the consumer's job
    pub payload: Vec<u8>,
}

/// Consumer role of the broker client.
#[async_trait]
pub trait Subscriber: Send {
    /// Wait for the next message.
    ///
    /// Blocks until a message is available, the broker errors, or `cancel`
    /// fires, in which case [`FetchError::Cancelled`] is returned and nothing
    /// is consumed.
    async fn fetch(&mut self, cancel: &CancellationToken) -> Result<Delivery, FetchError>;

    /// Mark `delivery` as processed so it is never handed out again.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), CommitError>;

    /// Release the broker connection. Uncommitted messages stay pending and are
    /// redelivered to this consumer on its next start.
    async fn close(&mut self);
}
