//! Notification error types.

use thiserror::Error;

/// Errors that can occur on the consumer side.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backbone failed.
    #[error("Event bus error: {0}")]
    Bus(#[from] event_bus::BusError),

    /// A stored audit row could not be mapped back onto an entry.
    #[error("Corrupt audit row: {0}")]
    Corrupt(String),

    /// The audit log is not accepting writes.
    #[error("Audit log unavailable: {0}")]
    Unavailable(String),
}

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotificationError>;
