use std::sync::Arc;

use tracker_broker::RedisSubscriber;
use tracker_common::config::{NotifierServiceConfig, load_dotenv};
use tracker_common::telemetry::init_tracing;
use tracker_common::{redis_pool, shutdown};
use tracker_notifier::{DeliveryWorker, LettreConnector, MailTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing("tracker_notifier=info,tracker_broker=info,tracker_common=info");

    tracing::info!("TaskTracker email notifier starting...");

    let config = NotifierServiceConfig::from_env()?;
    let cancel = shutdown::cancel_on_shutdown();

    // Broker first: without it there is nothing to deliver
    let redis = redis_pool::create_redis_pool(&config.broker.redis_url).await?;
    let subscriber = RedisSubscriber::connect(redis, &config.broker).await?;

    let transport = Arc::new(MailTransport::new(
        LettreConnector::new(&config.smtp)?,
        &config.smtp.from_email,
        &config.smtp.from_name,
    )?);
    transport.connect().await?;

    let mut worker = DeliveryWorker::new(subscriber, transport.clone(), &config.worker);
    let stats = worker.run(&cancel).await;

    transport.close().await;

    tracing::info!(
        received = stats.received,
        sent = stats.sent,
        failed = stats.send_failures + stats.decode_failures,
        "TaskTracker email notifier stopped."
    );
    Ok(())
}
