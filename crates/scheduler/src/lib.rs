//! Daily digest job: a cron trigger that fans out over every subscriber and
//! publishes one digest envelope per subscriber with task activity.

pub mod aggregator;
pub mod cron;
pub mod repository;
pub mod schedule;

#[cfg(test)]
mod testing;

pub use aggregator::{AggregationError, CycleReport, DigestAggregator, DigestResult};
pub use cron::{CronError, CronSchedule};
pub use repository::{PgSubscriberRepository, PgTaskRepository, SubscriberRepository, TaskRepository};
pub use schedule::DigestScheduler;
