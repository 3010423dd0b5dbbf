//! Redis Streams publisher.
//!
//! Publishes are funnelled through a channel into a single batching task. The
//! task waits at most `linger` for more requests (up to `batch_size`), writes the
//! whole batch with one pipelined round trip of `XADD`s and answers every caller
//! individually. A caller never waits longer than `write_timeout`; running out
//! of time is reported as [`PublishError::Timeout`], not swallowed.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tracker_common::config::BrokerConfig;
use tracker_common::types::Envelope;

use crate::client::Publisher;
use crate::error::{PublishError, is_connection_error};
use crate::partition::partition_for;

struct PublishRequest {
    stream: String,
    key: String,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<String, PublishError>>,
}

/// Where a batch ends up. Returns the new entry ids in request order.
#[async_trait]
trait StreamWriter: Send + 'static {
    async fn append(
        &mut self,
        batch: &[PublishRequest],
        maxlen: usize,
    ) -> redis::RedisResult<Vec<String>>;
}

#[async_trait]
impl StreamWriter for ConnectionManager {
    async fn append(
        &mut self,
        batch: &[PublishRequest],
        maxlen: usize,
    ) -> redis::RedisResult<Vec<String>> {
        let mut pipe = redis::pipe();
        for request in batch {
            pipe.cmd("XADD")
                .arg(&request.stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(maxlen)
                .arg("*")
                .arg("key")
                .arg(&request.key)
                .arg("payload")
                .arg(&request.payload);
        }
        pipe.query_async(self).await
    }
}

/// Handle to the batching publisher. Cheap to share behind an `Arc`.
pub struct RedisPublisher {
    tx: mpsc::Sender<PublishRequest>,
    config: BrokerConfig,
    shutdown: CancellationToken,
    batcher: Mutex<Option<JoinHandle<()>>>,
}

impl RedisPublisher {
    /// Spawn the batching task on the current runtime.
    pub fn start(conn: ConnectionManager, config: &BrokerConfig) -> Self {
        Self::with_writer(conn, config)
    }

    fn with_writer<W: StreamWriter>(writer: W, config: &BrokerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.batch_size * 4);
        let shutdown = CancellationToken::new();

        let batcher = Batcher {
            writer,
            rx,
            linger: config.linger,
            batch_size: config.batch_size,
            stream_maxlen: config.stream_maxlen,
        };
        let handle = tokio::spawn(batcher.run(shutdown.clone()));

        tracing::info!(
            topic = %config.topic,
            partitions = config.partitions,
            linger_ms = config.linger.as_millis() as u64,
            batch_size = config.batch_size,
            "Publisher initialized"
        );

        Self {
            tx,
            config: config.clone(),
            shutdown,
            batcher: Mutex::new(Some(handle)),
        }
    }

    /// Stop accepting publishes, flush what was already accepted and wait for
    /// the batching task to finish.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.batcher.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Publisher batching task panicked");
        }
        tracing::info!(topic = %self.config.topic, "Publisher closed");
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, envelope: &Envelope) -> Result<(), PublishError> {
        let payload = envelope.encode()?;
        let key = envelope.recipient().to_string();
        let partition = partition_for(&key, self.config.partitions);
        let stream = self.config.stream_for(partition);

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = PublishRequest {
            stream,
            key,
            payload,
            reply: reply_tx,
        };

        let write_timeout = self.config.write_timeout;
        let outcome = tokio::time::timeout(write_timeout, async {
            self.tx
                .send(request)
                .await
                .map_err(|_| PublishError::Closed)?;
            reply_rx.await.map_err(|_| PublishError::Closed)?
        })
        .await;

        match outcome {
            Ok(Ok(entry_id)) => {
                tracing::info!(
                    recipient = %envelope.recipient(),
                    kind = %envelope.kind(),
                    partition,
                    entry_id = %entry_id,
                    "Email queued"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(
                    recipient = %envelope.recipient(),
                    error = %e,
                    "Failed to publish envelope"
                );
                Err(e)
            }
            Err(_) => {
                tracing::error!(
                    recipient = %envelope.recipient(),
                    timeout_ms = write_timeout.as_millis() as u64,
                    "Publish timed out"
                );
                Err(PublishError::Timeout(write_timeout))
            }
        }
    }
}

struct Batcher<W> {
    writer: W,
    rx: mpsc::Receiver<PublishRequest>,
    linger: Duration,
    batch_size: usize,
    stream_maxlen: usize,
}

impl<W: StreamWriter> Batcher<W> {
    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => return,
                },
            };
            let batch = self.collect(first).await;
            self.flush(batch).await;
        }

        // Accepted requests are still written; new ones are refused.
        self.rx.close();
        while let Some(first) = self.rx.recv().await {
            let batch = self.collect(first).await;
            self.flush(batch).await;
        }
    }

    async fn collect(&mut self, first: PublishRequest) -> Vec<PublishRequest> {
        let deadline = Instant::now() + self.linger;
        let mut batch = vec![first];
        while batch.len() < self.batch_size {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(request)) => batch.push(request),
                Ok(None) | Err(_) => break,
            }
        }
        batch
    }

    async fn flush(&mut self, batch: Vec<PublishRequest>) {
        match self.writer.append(&batch, self.stream_maxlen).await {
            Ok(entry_ids) => {
                tracing::debug!(batch = batch.len(), "Flushed publish batch");
                let mut entry_ids = entry_ids.into_iter();
                for request in batch {
                    let reply = match entry_ids.next() {
                        Some(id) => Ok(id),
                        None => Err(PublishError::Rejected(
                            "broker returned no entry id".to_string(),
                        )),
                    };
                    let _ = request.reply.send(reply);
                }
            }
            Err(e) => {
                let connection = is_connection_error(&e);
                let message = e.to_string();
                tracing::warn!(batch = batch.len(), error = %message, "Publish batch failed");
                for request in batch {
                    let err = if connection {
                        PublishError::Connection(message.clone())
                    } else {
                        PublishError::Rejected(message.clone())
                    };
                    let _ = request.reply.send(Err(err));
                }
            }
        }
    }
}
