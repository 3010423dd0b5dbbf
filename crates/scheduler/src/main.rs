use std::sync::Arc;

use tracker_broker::RedisPublisher;
use tracker_common::config::{DigestServiceConfig, load_dotenv};
use tracker_common::telemetry::init_tracing;
use tracker_common::{db, redis_pool, shutdown};
use tracker_scheduler::{
    CronSchedule, DigestAggregator, DigestScheduler, PgSubscriberRepository, PgTaskRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing("tracker_scheduler=info,tracker_broker=info,tracker_common=info");

    tracing::info!("TaskTracker digest scheduler starting...");

    // Load configuration
    let config = DigestServiceConfig::from_env()?;
    let schedule = CronSchedule::parse(&config.scheduler.cron)?;

    // Connect to database and broker
    let pool = db::create_pool(&config.database).await?;
    let redis = redis_pool::create_redis_pool(&config.broker.redis_url).await?;
    let publisher = Arc::new(RedisPublisher::start(redis, &config.broker));

    let aggregator = DigestAggregator::new(
        Arc::new(PgSubscriberRepository::new(pool.clone())),
        Arc::new(PgTaskRepository::new(pool)),
        publisher.clone(),
        config.scheduler.window(),
    );

    let mut scheduler = DigestScheduler::new(Arc::new(aggregator), schedule)
        .with_run_on_start(config.scheduler.run_on_start);
    scheduler.start();

    shutdown::shutdown_signal().await;
    tracing::info!("Received shutdown signal, stopping gracefully...");

    scheduler.stop().await;
    publisher.close().await;

    tracing::info!("TaskTracker digest scheduler stopped.");
    Ok(())
}
