//! Bounded background publishing.
//!
//! A registration request must not wait for the broker, so the welcome
//! envelope is published from a spawned task. Every such task is tracked and
//! carries its own timeout; failures are logged and never reach the caller.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;

use crate::client::Publisher;
use crate::events::{NotificationEvent, publish_event};

const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct BackgroundDispatcher {
    publisher: Arc<dyn Publisher>,
    tracker: TaskTracker,
    timeout: Duration,
}

impl BackgroundDispatcher {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self::with_timeout(publisher, DEFAULT_DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(publisher: Arc<dyn Publisher>, timeout: Duration) -> Self {
        Self {
            publisher,
            tracker: TaskTracker::new(),
            timeout,
        }
    }

    /// Queue the welcome email for a freshly registered user. Returns
    /// immediately.
    pub fn user_registered(&self, email: impl Into<String>) {
        self.dispatch(NotificationEvent::UserRegistered {
            email: email.into(),
        });
    }

    pub fn dispatch(&self, event: NotificationEvent) {
        let publisher = Arc::clone(&self.publisher);
        let timeout = self.timeout;

        self.tracker.spawn(async move {
            let recipient = event.recipient().to_string();
            match tokio::time::timeout(timeout, publish_event(publisher.as_ref(), event)).await {
                Ok(Ok(())) => {
                    tracing::debug!(recipient = %recipient, "Background notification published");
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        recipient = %recipient,
                        error = %e,
                        "Failed to publish background notification"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        recipient = %recipient,
                        timeout_ms = timeout.as_millis() as u64,
                        "Background notification timed out"
                    );
                }
            }
        });
    }

    /// Number of dispatches still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting dispatches and wait for the in-flight ones.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
