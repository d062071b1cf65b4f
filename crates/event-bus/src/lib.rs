//! Event backbone adapters.
//!
//! Messages are appended to one of a topic's partitions, chosen by hashing
//! the message key, so all messages sharing a key are delivered in publish
//! order. Consumers belong to a group; each group tracks a committed offset
//! per partition and resumes from it after a restart (at-least-once).

pub mod bus;
pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;

pub use bus::{EventBus, EventConsumer, OffsetReset};
pub use error::{BusError, Result};
pub use memory::InMemoryEventBus;
pub use message::{Message, partition_for};
pub use postgres::PostgresEventBus;
