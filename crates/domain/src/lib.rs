//! Inventory domain.
//!
//! This crate provides:
//! - `ProductEvent`, the closed set of events a product mutation produces, and
//!   `EventEnvelope`, its JSON wire form on the backbone
//! - `LowStockPolicy`, deciding when a mutation must be followed by a warning
//! - `ProductService`, the mutation engine that writes the store and then
//!   emits the resulting events in order

pub mod error;
pub mod events;
pub mod low_stock;
pub mod service;

pub use common::{ProductId, SellerId};
pub use error::{DomainError, EmitError, Result};
pub use events::{
    CONSUMER_GROUP, EventEnvelope, EventType, LowStockWarning, ProductDeleted, ProductEvent,
    ProductFields, ProductSnapshot, ProductUpdated, TOPIC, UnknownEventType,
};
pub use low_stock::{DEFAULT_THRESHOLD, LowStockPolicy, should_warn};
pub use service::ProductService;
