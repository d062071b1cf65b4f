use common::ProductId;
use thiserror::Error;

/// Errors raised by a product store. Any of these is a store failure from the
/// caller's point of view and is surfaced verbatim.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back onto a product.
    #[error("Corrupt product row: {0}")]
    Corrupt(String),

    /// A row matched by a write was gone when it was read back.
    #[error("Product {0} vanished after a committed write")]
    Vanished(ProductId),

    /// The store is not accepting requests.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for product store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
