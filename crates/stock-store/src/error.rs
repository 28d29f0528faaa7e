use thiserror::Error;

/// Errors that can occur when talking to a stock backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The fast-path store rejected or failed a command.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The authoritative database failed a query.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A counter key holds something that is not an integer.
    #[error("Value at {key} is not an integer")]
    NotAnInteger { key: String },

    /// The backend is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
