//! Mail transport: one persistent, authenticated SMTP session per process.
//!
//! Every send runs under a single async mutex, so the session is never used by
//! two sends at once. Before each send the session is checked with `NOOP` and
//! recreated if the check fails. If `MAIL FROM` still fails (a stale session
//! often passes the check) the transport reconnects and retries that command
//! exactly once. Nothing after `MAIL FROM` is retried.
//!
//! The wire is behind [`SmtpSession`] / [`SessionConnector`]; production uses
//! the lettre binding in [`crate::lettre_session`].

use std::fmt;

use async_trait::async_trait;
use lettre::Address;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::compose::{compose, from_header, to_header};

/// Delivery failure as surfaced to the worker.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("could not connect to mail server: {0}")]
    Connect(String),

    #[error("mail server rejected credentials: {0}")]
    Auth(String),

    #[error("recipient {recipient} rejected: {reason}")]
    RecipientRejected { recipient: String, reason: String },

    #[error("delivery failed at {stage}: {reason}")]
    Transient { stage: &'static str, reason: String },

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

impl SendError {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SendError::Connect(_) => "connect",
            SendError::Auth(_) => "auth",
            SendError::RecipientRejected { .. } => "recipient_rejected",
            SendError::Transient { .. } => "transient",
            SendError::InvalidAddress { .. } => "invalid_address",
        }
    }
}

/// How a single SMTP command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpErrorKind {
    /// The connection itself is unusable (I/O, timeout, TLS, closed)
    Connection,
    /// 4xx reply
    Transient,
    /// 5xx reply
    Permanent,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SmtpError {
    pub kind: SmtpErrorKind,
    pub message: String,
}

impl SmtpError {
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind == SmtpErrorKind::Connection
    }
}

/// One open, authenticated SMTP session.
#[async_trait]
pub trait SmtpSession: Send {
    /// Liveness check.
    async fn noop(&mut self) -> Result<(), SmtpError>;
    async fn mail_from(&mut self, from: &Address) -> Result<(), SmtpError>;
    async fn rcpt_to(&mut self, to: &Address) -> Result<(), SmtpError>;
    /// `DATA`, the message, and the terminating dot.
    async fn data(&mut self, message: &[u8]) -> Result<(), SmtpError>;
    /// Abandon the current mail transaction, keeping the session.
    async fn reset(&mut self) -> Result<(), SmtpError>;
    async fn quit(&mut self) -> Result<(), SmtpError>;
}

/// Opens sessions: handshake, TLS upgrade, authentication.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Session: SmtpSession;

    /// Fails with [`SendError::Connect`] or [`SendError::Auth`].
    async fn connect(&self) -> Result<Self::Session, SendError>;
}

/// What the delivery worker needs from a transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        to: &str,
        display_name: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), SendError>;
}

pub struct MailTransport<C: SessionConnector> {
    connector: C,
    from: Address,
    from_header: String,
    session: Mutex<Option<C::Session>>,
}

impl<C: SessionConnector> MailTransport<C> {
    pub fn new(connector: C, from_email: &str, from_name: &str) -> Result<Self, SendError> {
        let from = parse_address(from_email)?;
        Ok(Self {
            connector,
            from_header: from_header(from_name, from_email),
            from,
            session: Mutex::new(None),
        })
    }

    /// Open the session now instead of on the first send.
    pub async fn connect(&self) -> Result<(), SendError> {
        let mut slot = self.session.lock().await;
        self.ensure_connected(&mut slot).await?;
        tracing::info!("SMTP session established");
        Ok(())
    }

    /// Send one message. See the module docs for the retry rules.
    pub async fn send(
        &self,
        to: &str,
        display_name: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), SendError> {
        let recipient = parse_address(to)?;
        let message = compose(
            &self.from_header,
            &to_header(display_name, to),
            subject,
            text_body,
            html_body,
        );

        let mut slot = self.session.lock().await;
        self.ensure_connected(&mut slot).await?;

        tracing::info!(recipient = %to, display_name, subject, "Sending email");

        self.mail_from(&mut slot).await?;
        self.rcpt_to(&mut slot, &recipient).await?;
        self.data(&mut slot, message.as_bytes()).await?;

        tracing::info!(recipient = %to, "Email sent");
        Ok(())
    }

    /// Say goodbye to the server. Safe to call when no session is open.
    pub async fn close(&self) {
        let mut slot = self.session.lock().await;
        if let Some(mut session) = slot.take() {
            match session.quit().await {
                Ok(()) => tracing::info!("SMTP session closed"),
                Err(e) => tracing::warn!(error = %e, "SMTP QUIT failed"),
            }
        }
    }

    async fn ensure_connected(&self, slot: &mut Option<C::Session>) -> Result<(), SendError> {
        let alive = match slot.as_mut() {
            Some(session) => match session.noop().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::info!(error = %e, "SMTP connection lost, reconnecting...");
                    false
                }
            },
            None => false,
        };

        if !alive {
            *slot = None;
            *slot = Some(self.connector.connect().await?);
        }
        Ok(())
    }

    async fn mail_from(&self, slot: &mut Option<C::Session>) -> Result<(), SendError> {
        let first = match session(slot)?.mail_from(&self.from).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        tracing::warn!(error = %first, "MAIL FROM failed, reconnecting once");
        *slot = None;
        *slot = Some(self.connector.connect().await?);

        match session(slot)?.mail_from(&self.from).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_connection() {
                    *slot = None;
                }
                Err(SendError::Transient {
                    stage: "MAIL FROM",
                    reason: format!("after reconnect: {e}"),
                })
            }
        }
    }

    async fn rcpt_to(&self, slot: &mut Option<C::Session>, to: &Address) -> Result<(), SendError> {
        let err = match session(slot)?.rcpt_to(to).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if err.is_connection() {
            *slot = None;
            return Err(SendError::Transient {
                stage: "RCPT TO",
                reason: err.message,
            });
        }

        self.reset(slot).await;
        Err(SendError::RecipientRejected {
            recipient: to.to_string(),
            reason: err.message,
        })
    }

    async fn data(&self, slot: &mut Option<C::Session>, message: &[u8]) -> Result<(), SendError> {
        let err = match session(slot)?.data(message).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if err.is_connection() {
            *slot = None;
        } else {
            self.reset(slot).await;
        }
        Err(SendError::Transient {
            stage: "DATA",
            reason: err.message,
        })
    }

    /// `RSET` after a rejected transaction; a session that cannot even reset is
    /// dropped.
    async fn reset(&self, slot: &mut Option<C::Session>) {
        if let Some(session) = slot.as_mut()
            && let Err(e) = session.reset().await
        {
            tracing::warn!(error = %e, "SMTP RSET failed, dropping session");
            *slot = None;
        }
    }
}

fn session<S>(slot: &mut Option<S>) -> Result<&mut S, SendError> {
    slot.as_mut()
        .ok_or_else(|| SendError::Connect("no SMTP session".to_string()))
}

fn parse_address(address: &str) -> Result<Address, SendError> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| SendError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl<C> Mailer for MailTransport<C>
where
    C: SessionConnector + 'static,
{
    async fn send(
        &self,
        to: &str,
        display_name: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), SendError> {
        MailTransport::send(self, to, display_name, subject, text_body, html_body).await
    }
}

impl<C: SessionConnector> fmt::Debug for MailTransport<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailTransport")
            .field("from", &self.from_header)
            .finish_non_exhaustive()
    }
}
