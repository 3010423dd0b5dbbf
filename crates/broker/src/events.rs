//! Domain events that turn into mail, and their envelope encoding.

use std::collections::BTreeMap;

use tracker_common::types::{Envelope, EnvelopeError, MessageKind};

use crate::client::Publisher;
use crate::error::PublishError;

const WELCOME_SUBJECT: &str = "Welcome to TaskTracker!";
const WELCOME_BODY: &str =
    "Thank you for registering with TaskTracker. We're excited to have you on board!";
const DIGEST_BODY: &str = "Here are your stats for the last 24 hours.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    UserRegistered {
        email: String,
    },
    /// Titles are already truncated and comma-joined; counts are the raw totals.
    DigestComputed {
        email: String,
        completed_count: usize,
        pending_count: usize,
        completed_titles: String,
        pending_titles: String,
    },
}

impl NotificationEvent {
    pub fn recipient(&self) -> &str {
        match self {
            NotificationEvent::UserRegistered { email }
            | NotificationEvent::DigestComputed { email, .. } => email,
        }
    }

    pub fn into_envelope(self) -> Result<Envelope, EnvelopeError> {
        match self {
            NotificationEvent::UserRegistered { email } => {
                let variables = BTreeMap::from([("email".to_string(), email.clone())]);
                Envelope::new(
                    MessageKind::Welcome,
                    email,
                    WELCOME_SUBJECT,
                    WELCOME_BODY,
                    variables,
                )
            }
            NotificationEvent::DigestComputed {
                email,
                completed_count,
                pending_count,
                completed_titles,
                pending_titles,
            } => {
                let subject = digest_subject(completed_count, pending_count);
                let variables = BTreeMap::from([
                    ("email".to_string(), email.clone()),
                    ("completedCount".to_string(), completed_count.to_string()),
                    ("pendingCount".to_string(), pending_count.to_string()),
                    ("completedTasks".to_string(), completed_titles),
                    ("pendingTasks".to_string(), pending_titles),
                ]);
                Envelope::new(MessageKind::DailyDigest, email, subject, DIGEST_BODY, variables)
            }
        }
    }
}

fn digest_subject(completed: usize, pending: usize) -> String {
    match (completed, pending) {
        (0, 0) => "TaskTracker: Your Daily Task Report".to_string(),
        (c, 0) => format!("TaskTracker: You've completed {c} tasks today!"),
        (0, p) => format!("TaskTracker: You have {p} pending tasks"),
        (c, p) => format!("TaskTracker: {c} tasks completed, {p} tasks pending"),
    }
}

/// Encode `event` and publish it.
pub async fn publish_event<P>(publisher: &P, event: NotificationEvent) -> Result<(), PublishError>
where
    P: Publisher + ?Sized,
{
    let envelope = event.into_envelope()?;
    publisher.publish(&envelope).await
}
