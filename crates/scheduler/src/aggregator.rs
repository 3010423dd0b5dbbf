//! Digest aggregator: one pass over every subscriber.
//!
//! For each subscriber, independently:
//! 1. Load pending tasks and tasks completed inside the window
//! 2. Skip the subscriber when both lists are empty
//! 3. Publish one `daily_digest` envelope with the raw counts and at most
//!    [`MAX_TITLES_PER_LIST`] titles from each list
//!
//! A failure for one subscriber is logged and counted; the cycle moves on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use tracker_broker::{PublishError, Publisher};
use tracker_broker::events::{NotificationEvent, publish_event};
use tracker_common::error::AppError;
use tracker_common::types::{Subscriber, Task};

use crate::repository::{SubscriberRepository, TaskRepository};

pub const MAX_TITLES_PER_LIST: usize = 5;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("failed to list subscribers: {0}")]
    ListSubscribers(#[source] AppError),

    #[error("failed to load tasks for subscriber {subscriber_id}: {source}")]
    LoadTasks {
        subscriber_id: i64,
        #[source]
        source: AppError,
    },

    #[error("failed to publish digest for subscriber {subscriber_id}: {source}")]
    Publish {
        subscriber_id: i64,
        #[source]
        source: PublishError,
    },
}

/// Per-subscriber digest, before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResult {
    pub completed_count: usize,
    pub pending_count: usize,
    /// Up to five titles, most recently completed first, joined with `", "`
    pub completed_titles: String,
    /// Up to five titles, most recently created first, joined with `", "`
    pub pending_titles: String,
}

impl DigestResult {
    /// Both slices must already be in recency order. Returns `None` when there
    /// is nothing to report.
    pub fn compute(completed: &[Task], pending: &[Task]) -> Option<Self> {
        if completed.is_empty() && pending.is_empty() {
            return None;
        }
        Some(Self {
            completed_count: completed.len(),
            pending_count: pending.len(),
            completed_titles: join_titles(completed),
            pending_titles: join_titles(pending),
        })
    }

    pub fn into_event(self, email: String) -> NotificationEvent {
        NotificationEvent::DigestComputed {
            email,
            completed_count: self.completed_count,
            pending_count: self.pending_count,
            completed_titles: self.completed_titles,
            pending_titles: self.pending_titles,
        }
    }
}

fn join_titles(tasks: &[Task]) -> String {
    tasks
        .iter()
        .take(MAX_TITLES_PER_LIST)
        .map(|t| t.title.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome counters of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub subscribers: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Published,
    Skipped,
}

pub struct DigestAggregator {
    subscribers: Arc<dyn SubscriberRepository>,
    tasks: Arc<dyn TaskRepository>,
    publisher: Arc<dyn Publisher>,
    window: chrono::Duration,
}

impl DigestAggregator {
    pub fn new(
        subscribers: Arc<dyn SubscriberRepository>,
        tasks: Arc<dyn TaskRepository>,
        publisher: Arc<dyn Publisher>,
        window: chrono::Duration,
    ) -> Self {
        Self {
            subscribers,
            tasks,
            publisher,
            window,
        }
    }

    /// Run one digest pass as of `now`.
    ///
    /// Only failing to list subscribers aborts the cycle; every per-subscriber
    /// failure is logged and shows up in [`CycleReport::failed`].
    pub async fn run_digest_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, AggregationError> {
        let since = now - self.window;
        tracing::info!(since = %since, "Starting digest cycle");

        let subscribers = self
            .subscribers
            .list_all_subscribers()
            .await
            .map_err(AggregationError::ListSubscribers)?;

        let mut report = CycleReport {
            subscribers: subscribers.len(),
            ..CycleReport::default()
        };

        for subscriber in &subscribers {
            match self.process_subscriber(subscriber, since).await {
                Ok(Outcome::Published) => report.published += 1,
                Ok(Outcome::Skipped) => {
                    tracing::debug!(subscriber_id = subscriber.id, "No task activity, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(
                        subscriber_id = subscriber.id,
                        recipient = %subscriber.email,
                        error = %e,
                        "Digest failed for subscriber"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            subscribers = report.subscribers,
            published = report.published,
            skipped = report.skipped,
            failed = report.failed,
            "Digest cycle completed"
        );
        Ok(report)
    }

    async fn process_subscriber(
        &self,
        subscriber: &Subscriber,
        since: DateTime<Utc>,
    ) -> Result<Outcome, AggregationError> {
        let load_failed = |source| AggregationError::LoadTasks {
            subscriber_id: subscriber.id,
            source,
        };
        let pending = self
            .tasks
            .list_pending(subscriber.id)
            .await
            .map_err(load_failed)?;
        let completed = self
            .tasks
            .list_completed_since(subscriber.id, since)
            .await
            .map_err(load_failed)?;

        let Some(digest) = DigestResult::compute(&completed, &pending) else {
            return Ok(Outcome::Skipped);
        };
        let (completed_count, pending_count) = (digest.completed_count, digest.pending_count);

        publish_event(
            self.publisher.as_ref(),
            digest.into_event(subscriber.email.clone()),
        )
        .await
        .map_err(|source| AggregationError::Publish {
            subscriber_id: subscriber.id,
            source,
        })?;

        tracing::info!(
            subscriber_id = subscriber.id,
            recipient = %subscriber.email,
            completed = completed_count,
            pending = pending_count,
            "Digest published"
        );
        Ok(Outcome::Published)
    }
}
