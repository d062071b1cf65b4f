//! Domain error types.

use event_bus::BusError;
use product_store::{InvalidProduct, StoreError};
use thiserror::Error;

use crate::events::EventType;

/// Why an event could not be handed to the backbone.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors that can occur during a product mutation.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No product matched `(seller_id, product_id)`.
    #[error("Not found")]
    NotFound,

    /// The input was rejected before touching the store.
    #[error("Invalid product: {0}")]
    Validation(#[from] InvalidProduct),

    /// The store rejected a read or write.
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    /// The store write is committed but its event never reached the backbone.
    #[error("{event_type} event on key {partition_key} was not emitted after a committed write: {source}")]
    Emission {
        event_type: EventType,
        partition_key: String,
        #[source]
        source: EmitError,
    },
}

impl DomainError {
    /// Returns true when the store already holds the mutation despite the error.
    pub fn is_committed(&self) -> bool {
        matches!(self, DomainError::Emission { .. })
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
