//! SMTP sessions over lettre's low-level async connection.

use std::time::Duration;

use async_trait::async_trait;
use lettre::Address;
use lettre::transport::smtp::Error as LettreError;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Noop, Rcpt, Rset};
use lettre::transport::smtp::extension::ClientId;

use tracker_common::config::SmtpConfig;

use crate::mailer::{SendError, SessionConnector, SmtpError, SmtpErrorKind, SmtpSession};

/// Opens authenticated sessions against the configured relay.
pub struct LettreConnector {
    host: String,
    port: u16,
    timeout: Duration,
    hello: ClientId,
    tls: TlsParameters,
    credentials: Credentials,
}

impl LettreConnector {
    pub fn new(config: &SmtpConfig) -> Result<Self, SendError> {
        let tls = TlsParameters::builder(config.host.clone())
            .dangerous_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| SendError::Connect(format!("TLS setup failed: {e}")))?;

        let hello = match &config.hello_name {
            Some(name) => ClientId::Domain(name.clone()),
            None => ClientId::default(),
        };

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout,
            hello,
            tls,
            credentials: Credentials::new(config.user.clone(), config.password.clone()),
        })
    }
}

#[async_trait]
impl SessionConnector for LettreConnector {
    type Session = LettreSession;

    async fn connect(&self) -> Result<LettreSession, SendError> {
        let mut conn = AsyncSmtpConnection::connect_tokio1(
            (self.host.clone(), self.port),
            Some(self.timeout),
            &self.hello,
            None,
            None,
        )
        .await
        .map_err(|e| SendError::Connect(format!("{}:{}: {e}", self.host, self.port)))?;

        if conn.can_starttls() {
            conn.starttls(self.tls.clone(), &self.hello)
                .await
                .map_err(|e| SendError::Connect(format!("STARTTLS failed: {e}")))?;
        } else {
            tracing::warn!(host = %self.host, "SMTP server does not offer STARTTLS, continuing in plaintext");
        }

        if let Err(e) = conn
            .auth(&[Mechanism::Plain, Mechanism::Login], &self.credentials)
            .await
        {
            conn.abort().await;
            return Err(SendError::Auth(e.to_string()));
        }

        tracing::debug!(host = %self.host, port = self.port, "SMTP session authenticated");
        Ok(LettreSession { conn })
    }
}

pub struct LettreSession {
    conn: AsyncSmtpConnection,
}

fn classify(err: LettreError) -> SmtpError {
    let kind = if err.is_permanent() {
        SmtpErrorKind::Permanent
    } else if err.is_transient() {
        SmtpErrorKind::Transient
    } else {
        SmtpErrorKind::Connection
    };
    SmtpError::new(kind, err.to_string())
}

#[async_trait]
impl SmtpSession for LettreSession {
    async fn noop(&mut self) -> Result<(), SmtpError> {
        self.conn.command(Noop).await.map(drop).map_err(classify)
    }

    async fn mail_from(&mut self, from: &Address) -> Result<(), SmtpError> {
        self.conn
            .command(Mail::new(Some(from.clone()), vec![]))
            .await
            .map(drop)
            .map_err(classify)
    }

    async fn rcpt_to(&mut self, to: &Address) -> Result<(), SmtpError> {
        self.conn
            .command(Rcpt::new(to.clone(), vec![]))
            .await
            .map(drop)
            .map_err(classify)
    }

    async fn data(&mut self, message: &[u8]) -> Result<(), SmtpError> {
        self.conn.command(Data).await.map_err(classify)?;
        self.conn.message(message).await.map(drop).map_err(classify)
    }

    async fn reset(&mut self) -> Result<(), SmtpError> {
        self.conn.command(Rset).await.map(drop).map_err(classify)
    }

    async fn quit(&mut self) -> Result<(), SmtpError> {
        self.conn.quit().await.map(drop).map_err(classify)
    }
}
