//! Email side of the notification pipeline.
//!
//! The [`DeliveryWorker`] pulls envelopes off the broker, renders them and
//! hands them to the [`MailTransport`], committing every message whether or
//! not delivery succeeded.

pub mod compose;
pub mod lettre_session;
pub mod mailer;
pub mod render;
pub mod worker;

pub use lettre_session::{LettreConnector, LettreSession};
pub use mailer::{MailTransport, Mailer, SendError, SessionConnector, SmtpSession};
pub use worker::{DeliveryWorker, WorkerState, WorkerStats};
