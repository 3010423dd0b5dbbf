use std::time::Duration;

use thiserror::Error;

use tracker_common::types::EnvelopeError;

/// Why a publish did not reach the broker.
///
/// The publisher never retries; the caller decides whether a failure is worth
/// another attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("envelope could not be encoded: {0}")]
    Encode(#[from] EnvelopeError),

    #[error("broker did not acknowledge within {0:?}")]
    Timeout(Duration),

    #[error("publisher is closed")]
    Closed,

    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker rejected the write: {0}")]
    Rejected(String),
}

/// Why a fetch returned without a message.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("unexpected broker reply: {0}")]
    Protocol(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Why an offset could not be committed.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("unknown delivery {partition}/{offset}")]
    UnknownDelivery { partition: String, offset: String },
}

pub(crate) fn is_connection_error(err: &redis::RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}
