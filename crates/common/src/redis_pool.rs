use redis::Client;
use redis::aio::ConnectionManager;

use crate::error::AppError;

/// Create a Redis connection manager for the broker.
///
/// The manager reconnects transparently after the initial handshake. Blocking
/// stream reads should get a manager of their own so they never stall the
/// publisher's writes.
pub async fn create_redis_pool(redis_url: &str) -> Result<ConnectionManager, AppError> {
    let client = Client::open(redis_url)
        .map_err(|e| AppError::Config(format!("invalid REDIS_URL: {e}")))?;
    let manager = ConnectionManager::new(client)
        .await
        .map_err(|e| AppError::Connection(format!("Redis: {e}")))?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}
