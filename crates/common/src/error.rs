use thiserror::Error;

/// Common error type for configuration and storage access.
///
/// Configuration errors are fatal at startup. Connection and database errors
/// are caught and logged per item by the run loops.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
