//! Read-only access to subscribers and their tasks.
//!
//! The digest job never writes: the `users` and `tasks` tables belong to the
//! task API. Everything goes through the two traits below so the aggregator can
//! be exercised against in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tracker_common::error::AppError;
use tracker_common::types::{Subscriber, Task};

#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    /// Every registered user. A full scan; the table is small.
    async fn list_all_subscribers(&self) -> Result<Vec<Subscriber>, AppError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Open tasks, most recently created first.
    async fn list_pending(&self, subscriber_id: i64) -> Result<Vec<Task>, AppError>;

    /// Tasks completed at or after `since`, most recently completed first.
    async fn list_completed_since(
        &self,
        subscriber_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Task>, AppError>;
}

pub struct PgSubscriberRepository {
    pool: PgPool,
}

impl PgSubscriberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberRepository for PgSubscriberRepository {
    async fn list_all_subscribers(&self) -> Result<Vec<Subscriber>, AppError> {
        let subscribers: Vec<Subscriber> =
            sqlx::query_as("SELECT id, email FROM users ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(subscribers)
    }
}

pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn list_pending(&self, subscriber_id: i64) -> Result<Vec<Task>, AppError> {
        let tasks: Vec<Task> = sqlx::query_as(
            r#"
            SELECT id, title, description, user_id, completed, completed_at, created_at, updated_at
            FROM tasks
            WHERE user_id = $1
              AND completed = false
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn list_completed_since(
        &self,
        subscriber_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Task>, AppError> {
        let tasks: Vec<Task> = sqlx::query_as(
            r#"
            SELECT id, title, description, user_id, completed, completed_at, created_at, updated_at
            FROM tasks
            WHERE user_id = $1
              AND completed = true
              AND completed_at >= $2
            ORDER BY completed_at DESC, id DESC
            "#,
        )
        .bind(subscriber_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }
}
