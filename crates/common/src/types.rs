use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rendering strategy selected by an envelope's `type` tag.
///
/// The set is open-ended: tags this build does not know decode to
/// [`MessageKind::Other`] and re-encode unchanged, so producers can introduce
/// new kinds before every consumer is upgraded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Welcome,
    DailyDigest,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Welcome => "welcome",
            MessageKind::DailyDigest => "daily_digest",
            MessageKind::Other(tag) => tag,
        }
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "welcome" => MessageKind::Welcome,
            // `daily_stats` is the tag older scheduler builds still publish
            "daily_digest" | "daily_stats" => MessageKind::DailyDigest,
            _ => MessageKind::Other(tag),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        MessageKind::from(tag.to_string())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while building or (de)serializing an [`Envelope`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope recipient must not be empty")]
    EmptyRecipient,

    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// One notification to deliver: the only contract between producers and the
/// delivery worker.
///
/// Wire form is a flat JSON object:
///
/// ```json
/// {"type":"daily_digest","to":"a@example.com","subject":"…","body":"…","variables":{"pendingCount":"2"}}
/// ```
///
/// `type`, `to`, `subject` and `body` are required. `variables` is optional on
/// the wire and omitted when empty. New fields must
/// be optional and existing ones are never repurposed. Envelopes are immutable
/// once built; every constructor path, including deserialization, rejects an
/// empty recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope")]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    to: String,
    subject: String,
    body: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    variables: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    to: String,
    subject: String,
    body: String,
    #[serde(default)]
    variables: Option<BTreeMap<String, String>>,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        Envelope::new(
            wire.kind,
            wire.to,
            wire.subject,
            wire.body,
            wire.variables.unwrap_or_default(),
        )
    }
}

impl Envelope {
    pub fn new(
        kind: MessageKind,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        variables: BTreeMap<String, String>,
    ) -> Result<Self, EnvelopeError> {
        let to = to.into();
        if to.trim().is_empty() {
            return Err(EnvelopeError::EmptyRecipient);
        }
        Ok(Self {
            kind,
            to,
            subject: subject.into(),
            body: body.into(),
            variables,
        })
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Delivery address; also the broker partition key.
    pub fn recipient(&self) -> &str {
        &self.to
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Plain-text body, also the fallback when no HTML renderer applies.
    pub fn plain_body(&self) -> &str {
        &self.body
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// A rendering variable, treating empty strings as absent.
    pub fn variable(&self, key: &str) -> Option<&str> {
        self.variables
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(payload).map_err(EnvelopeError::Decode)
    }
}

/// A user who receives digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
}

/// A task row as the digest job sees it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub user_id: i64,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
