use thiserror::Error;

/// Errors raised by an event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The backbone refused the publish.
    #[error("Publish rejected: {0}")]
    Rejected(String),

    /// None of the configured brokers accepted a connection.
    #[error("No broker reachable ({0} tried)")]
    NoBrokerReachable(usize),

    /// The bus was configured without partitions.
    #[error("Topic partition count must be at least 1")]
    NoPartitions,
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
