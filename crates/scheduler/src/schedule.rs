//! Recurring trigger for the digest aggregator.
//!
//! A single task sleeps until the next cron fire time, runs the cycle to
//! completion, then computes the following fire time. A slow cycle therefore
//! delays the next one instead of overlapping it, and a fire time missed while
//! a cycle was running is skipped rather than replayed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::DigestAggregator;
use crate::cron::CronSchedule;

pub struct DigestScheduler {
    aggregator: Arc<DigestAggregator>,
    schedule: CronSchedule,
    run_on_start: bool,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DigestScheduler {
    pub fn new(aggregator: Arc<DigestAggregator>, schedule: CronSchedule) -> Self {
        Self {
            aggregator,
            schedule,
            run_on_start: false,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Run one cycle as soon as the scheduler starts, before the first fire time.
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Spawn the trigger loop. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        tracing::info!(cron = %self.schedule, "Digest scheduler started");
        let trigger = TriggerLoop {
            aggregator: Arc::clone(&self.aggregator),
            schedule: self.schedule.clone(),
            run_on_start: self.run_on_start,
            cancel: self.cancel.clone(),
        };
        self.handle = Some(tokio::spawn(trigger.run()));
    }

    /// Cancel the trigger loop and wait for it. A cycle already running is
    /// allowed to finish first.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Digest scheduler task panicked");
        }
        tracing::info!("Digest scheduler stopped");
    }
}

struct TriggerLoop {
    aggregator: Arc<DigestAggregator>,
    schedule: CronSchedule,
    run_on_start: bool,
    cancel: CancellationToken,
}

impl TriggerLoop {
    async fn run(self) {
        if self.run_on_start {
            tracing::info!("Running digest cycle on startup");
            self.run_cycle().await;
        }

        let mut last_fire: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            // Never fire the same minute twice, even if the clock steps back.
            let reference = last_fire.map_or(now, |fired| fired.max(now));
            let Some(next) = self.schedule.next_after(reference) else {
                tracing::warn!(cron = %self.schedule, "Cron expression never fires again");
                return;
            };

            let wait = (next - now).to_std().unwrap_or_default();
            tracing::info!(next_run = %next, "Next digest cycle scheduled");

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }

            last_fire = Some(next);
            self.run_cycle().await;
        }
    }

    async fn run_cycle(&self) {
        if let Err(e) = self.aggregator.run_digest_cycle(Utc::now()).await {
            tracing::error!(error = %e, "Digest cycle failed");
        }
    }
}
