//! Consumer side of the product event pipeline.
//!
//! This crate provides:
//! - [`AuditLog`] for the append-only, per-seller event log
//! - [`SubscriberRegistry`] for live subscribers, grouped by seller
//! - [`NotificationRouter`], the background consumer that writes the audit
//!   log and pushes alert-class events to live subscribers

pub mod audit;
pub mod error;
pub mod registry;
pub mod router;

pub use audit::{AuditEntry, AuditLog, AuditQuery, InMemoryAuditLog, PostgresAuditLog};
pub use error::{NotificationError, Result};
pub use registry::{
    PushError, PushReport, PushSink, SubscriberRegistry, Subscription, SubscriptionGuard,
    SubscriptionId,
};
pub use router::{NotificationRouter, RouterConfig};
