//! Redis Streams subscriber.
//!
//! Every partition stream carries one consumer group shared by all delivery
//! workers. Reading uses `XREADGROUP … BLOCK max_wait`, so an idle fetch wakes
//! up at least every `max_wait` and a cancellation is observed immediately.
//! Committing is `XACK`.
//!
//! On start the subscriber first drains its own pending entries list (entries
//! it was handed before a crash but never acknowledged) and only then reads new
//! entries. Entries another consumer was handed and never acknowledged (it
//! crashed, or restarted under a new name) are taken over with `XAUTOCLAIM`
//! once they have been idle for `claim_idle`. Together that is the
//! at-least-once half of the contract. `XAUTOCLAIM` needs Redis 6.2 or newer.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tracker_common::config::BrokerConfig;

use crate::client::{Delivery, Subscriber};
use crate::error::{CommitError, FetchError};

/// Id that makes `XREADGROUP` return this consumer's pending entries.
const PENDING_BACKLOG: &str = "0";
/// Id that makes `XREADGROUP` return entries never delivered to anyone.
const NEW_ENTRIES: &str = ">";
/// `XAUTOCLAIM` scan start and its "scan complete" cursor.
const CLAIM_FROM_START: &str = "0-0";

pub struct RedisSubscriber {
    conn: ConnectionManager,
    streams: Vec<String>,
    group: String,
    consumer: String,
    fetch_count: usize,
    max_wait: Duration,
    claim_idle: Duration,
    backlog_drained: bool,
    last_claim: Option<Instant>,
    /// Where the next `XAUTOCLAIM` scan resumes, per stream.
    claim_cursors: HashMap<String, String>,
    buffer: VecDeque<Delivery>,
}

impl RedisSubscriber {
    /// Join the consumer group on every assigned partition, creating streams
    /// and the group where missing.
    ///
    /// `conn` should be dedicated to this subscriber: blocking reads hold the
    /// connection for up to `max_wait`.
    pub async fn connect(mut conn: ConnectionManager, config: &BrokerConfig) -> Result<Self, FetchError> {
        let streams = config.assigned_streams();
        for stream in &streams {
            ensure_group(&mut conn, stream, &config.group_id).await?;
        }

        tracing::info!(
            group = %config.group_id,
            consumer = %config.consumer_name,
            streams = ?streams,
            "Subscriber joined consumer group"
        );

        Ok(Self {
            conn,
            streams,
            group: config.group_id.clone(),
            consumer: config.consumer_name.clone(),
            fetch_count: config.fetch_count,
            max_wait: config.max_wait,
            claim_idle: config.claim_idle,
            backlog_drained: false,
            last_claim: None,
            claim_cursors: HashMap::new(),
            buffer: VecDeque::new(),
        })
    }

    async fn read_batch(&mut self) -> Result<usize, FetchError> {
        if self.backlog_drained && self.claim_due() {
            let claimed = self.claim_abandoned().await?;
            if claimed > 0 {
                return Ok(claimed);
            }
        }

        let start_id = if self.backlog_drained {
            NEW_ENTRIES
        } else {
            PENDING_BACKLOG
        };
        let ids = vec![start_id; self.streams.len()];

        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.fetch_count);
        if self.backlog_drained {
            options = options.block(self.max_wait.as_millis() as usize);
        }

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(self.streams.as_slice(), ids.as_slice(), &options)
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;

        let mut received = 0;
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                // Entries trimmed away while pending come back without fields;
                // an empty payload fails to decode and is committed as poison.
                let payload: Vec<u8> = entry.get("payload").unwrap_or_default();
                let key: Option<String> = entry.get("key");
                self.buffer.push_back(Delivery {
                    partition: stream.key.clone(),
                    offset: entry.id,
                    key,
                    payload,
                });
                received += 1;
            }
        }

        if !self.backlog_drained && received == 0 {
            tracing::info!(consumer = %self.consumer, "Pending backlog drained");
            self.backlog_drained = true;
        }

        Ok(received)
    }

    fn claim_due(&self) -> bool {
        self.last_claim
            .is_none_or(|at| at.elapsed() >= self.claim_idle)
    }

    /// Take over entries that sat unacknowledged in any consumer's pending
    /// list for at least `claim_idle`.
    async fn claim_abandoned(&mut self) -> Result<usize, FetchError> {
        let min_idle_ms = self.claim_idle.as_millis() as u64;
        let mut claimed = 0;
        let mut more_pending = false;

        for stream in &self.streams {
            let start = self
                .claim_cursors
                .get(stream)
                .map_or(CLAIM_FROM_START, String::as_str);
            let reply: redis::Value = redis::cmd("XAUTOCLAIM")
                .arg(stream)
                .arg(&self.group)
                .arg(&self.consumer)
                .arg(min_idle_ms)
                .arg(start)
                .arg("COUNT")
                .arg(self.fetch_count)
                .query_async(&mut self.conn)
                .await
                .map_err(|e| FetchError::Connection(e.to_string()))?;

            let (cursor, deliveries) = parse_autoclaim(stream, &reply)
                .map_err(|e| FetchError::Protocol(format!("XAUTOCLAIM on {stream}: {e}")))?;

            if !deliveries.is_empty() {
                tracing::warn!(
                    stream = %stream,
                    consumer = %self.consumer,
                    claimed = deliveries.len(),
                    "Claimed entries abandoned by another consumer"
                );
            }
            more_pending |= cursor != CLAIM_FROM_START;
            claimed += deliveries.len();
            self.buffer.extend(deliveries);
            self.claim_cursors.insert(stream.clone(), cursor);
        }

        // Keep sweeping on every read until each scan has reached the end of
        // its pending list
        self.last_claim = if more_pending { None } else { Some(Instant::now()) };
        Ok(claimed)
    }
}

/// Split an `XAUTOCLAIM` reply into the next scan cursor and the claimed
/// entries.
///
/// Redis 7 replies `[cursor, entries, deleted_ids]`, Redis 6.2 only
/// `[cursor, entries]` with `nil` standing in for entries trimmed from the
/// stream. A claimed entry without fields becomes an empty payload, which the
/// worker commits as undecodable.
fn parse_autoclaim(stream: &str, reply: &redis::Value) -> redis::RedisResult<(String, Vec<Delivery>)> {
    let parts: Vec<redis::Value> = redis::from_redis_value(reply)?;
    let (Some(cursor), Some(entries)) = (parts.first(), parts.get(1)) else {
        return Err((redis::ErrorKind::TypeError, "XAUTOCLAIM reply is too short").into());
    };

    let cursor: String = redis::from_redis_value(cursor)?;
    let entries: Vec<Option<(String, Option<HashMap<String, Vec<u8>>>)>> =
        redis::from_redis_value(entries)?;

    let deliveries = entries
        .into_iter()
        .flatten()
        .map(|(id, fields)| {
            let mut fields = fields.unwrap_or_default();
            Delivery {
                partition: stream.to_string(),
                offset: id,
                key: fields
                    .get("key")
                    .map(|k| String::from_utf8_lossy(k).into_owned()),
                payload: fields.remove("payload").unwrap_or_default(),
            }
        })
        .collect();

    Ok((cursor, deliveries))
}

async fn ensure_group(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
) -> Result<(), FetchError> {
    // Start from the beginning so entries published before the first worker
    // ever ran are still delivered.
    let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;
    match created {
        Ok(()) => {
            tracing::info!(stream, group, "Created consumer group");
            Ok(())
        }
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(FetchError::Connection(e.to_string())),
    }
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn fetch(&mut self, cancel: &CancellationToken) -> Result<Delivery, FetchError> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(delivery);
            }
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                read = self.read_batch() => {
                    let received = read?;
                    tracing::trace!(received, "Read from partition streams");
                }
            }
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), CommitError> {
        let acked: i64 = self
            .conn
            .xack(&delivery.partition, &self.group, &[&delivery.offset])
            .await
            .map_err(|e| CommitError::Connection(e.to_string()))?;

        if acked == 0 {
            // Already acknowledged (or claimed elsewhere); nothing left to do.
            tracing::debug!(
                stream = %delivery.partition,
                entry_id = %delivery.offset,
                "Entry was not pending at commit time"
            );
        }
        Ok(())
    }

    async fn close(&mut self) {
        let abandoned = self.buffer.len();
        self.buffer.clear();
        tracing::info!(
            consumer = %self.consumer,
            abandoned,
            "Subscriber closed; unacknowledged entries stay pending"
        );
    }
}
