use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tracker_common::error::AppError;
use tracker_common::types::{Subscriber, Task};

use crate::repository::{SubscriberRepository, TaskRepository};

/// Users and tasks held in memory, ordered the way the SQL repositories order.
#[derive(Default)]
pub(crate) struct InMemoryStore {
    pub subscribers: Vec<Subscriber>,
    pub tasks: Vec<Task>,
    pub failing_task_loads: HashSet<i64>,
    pub fail_listing: bool,
}

impl InMemoryStore {
    pub fn subscriber(&mut self, id: i64, email: &str) -> &mut Self {
        self.subscribers.push(Subscriber {
            id,
            email: email.to_string(),
        });
        self
    }

    pub fn pending(&mut self, user_id: i64, title: &str, created_at: DateTime<Utc>) -> &mut Self {
        self.push(user_id, title, None, created_at)
    }

    pub fn completed(&mut self, user_id: i64, title: &str, completed_at: DateTime<Utc>) -> &mut Self {
        self.push(user_id, title, Some(completed_at), completed_at)
    }

    fn push(
        &mut self,
        user_id: i64,
        title: &str,
        completed_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> &mut Self {
        let id = self.tasks.len() as i64 + 1;
        self.tasks.push(Task {
            id,
            title: title.to_string(),
            description: String::new(),
            user_id,
            completed: completed_at.is_some(),
            completed_at,
            created_at,
            updated_at: created_at,
        });
        self
    }

    fn check(&self, subscriber_id: i64) -> Result<(), AppError> {
        if self.failing_task_loads.contains(&subscriber_id) {
            return Err(AppError::Connection(format!(
                "scripted task load failure for {subscriber_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriberRepository for InMemoryStore {
    async fn list_all_subscribers(&self) -> Result<Vec<Subscriber>, AppError> {
        if self.fail_listing {
            return Err(AppError::Connection("scripted listing failure".to_string()));
        }
        Ok(self.subscribers.clone())
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn list_pending(&self, subscriber_id: i64) -> Result<Vec<Task>, AppError> {
        self.check(subscriber_id)?;
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.user_id == subscriber_id && !t.completed)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn list_completed_since(
        &self,
        subscriber_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Task>, AppError> {
        self.check(subscriber_id)?;
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| {
                t.user_id == subscriber_id && t.completed && t.completed_at.is_some_and(|at| at >= since)
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(tasks)
    }
}
