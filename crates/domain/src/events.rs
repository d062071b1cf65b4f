//! Product events and their wire envelope.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use common::{ProductId, SellerId, partition_key};
use product_store::Product;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backbone topic carrying every product event.
pub const TOPIC: &str = "product-events";

/// Consumer group of the notification router.
pub const CONSUMER_GROUP: &str = "notifications-consumer";

/// Discriminant of a [`ProductEvent`], as written in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    LowStockWarning,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Created,
        EventType::Updated,
        EventType::Deleted,
        EventType::LowStockWarning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "Created",
            EventType::Updated => "Updated",
            EventType::Deleted => "Deleted",
            EventType::LowStockWarning => "LowStockWarning",
        }
    }

    /// Alert-class events are pushed to live subscribers.
    pub fn is_alert(&self) -> bool {
        matches!(self, EventType::LowStockWarning)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Full product state carried by a `Created` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
    pub quantity: u32,
    pub category: String,
}

impl From<&Product> for ProductSnapshot {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            quantity: product.quantity,
            category: product.category.clone(),
        }
    }
}

/// A sparse set of product fields; absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Payload of an `Updated` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductUpdated {
    pub before: ProductFields,
    pub after: ProductFields,
}

impl ProductUpdated {
    /// Diffs two states of one product.
    ///
    /// Only changed fields appear on either side, except `after.quantity`,
    /// which is always present.
    pub fn between(before: &Product, after: &Product) -> Self {
        let mut diff = ProductUpdated::default();

        if before.name != after.name {
            diff.before.name = Some(before.name.clone());
            diff.after.name = Some(after.name.clone());
        }
        if before.description != after.description {
            diff.before.description = before.description.clone();
            diff.after.description = after.description.clone();
        }
        if before.price != after.price {
            diff.before.price = Some(before.price);
            diff.after.price = Some(after.price);
        }
        if before.quantity != after.quantity {
            diff.before.quantity = Some(before.quantity);
        }
        diff.after.quantity = Some(after.quantity);
        if before.category != after.category {
            diff.before.category = Some(before.category.clone());
            diff.after.category = Some(after.category.clone());
        }

        diff
    }
}

/// Payload of a `Deleted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDeleted {
    pub id: ProductId,
}

/// Payload of a `LowStockWarning` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockWarning {
    pub id: ProductId,
    pub quantity: u32,
    pub threshold: u32,
}

/// Events emitted by the mutation engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductEvent {
    Created(ProductSnapshot),
    Updated(ProductUpdated),
    Deleted(ProductDeleted),
    LowStockWarning(LowStockWarning),
}

impl ProductEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            ProductEvent::Created(_) => EventType::Created,
            ProductEvent::Updated(_) => EventType::Updated,
            ProductEvent::Deleted(_) => EventType::Deleted,
            ProductEvent::LowStockWarning(_) => EventType::LowStockWarning,
        }
    }

    /// Serializes the variant payload alone, as carried in the `payload` field.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&PayloadRef::from(self))
    }
}

/// An event together with its routing keys and emission time.
///
/// On the wire:
///
/// ```json
/// { "type": "LowStockWarning", "ts": "2024-05-01T10:00:00.000000000Z",
///   "sellerId": "s1", "productId": 42,
///   "payload": { "id": 42, "quantity": 1, "threshold": 5 } }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireEnvelope")]
pub struct EventEnvelope {
    pub ts: DateTime<Utc>,
    pub seller_id: SellerId,
    pub product_id: Option<ProductId>,
    pub event: ProductEvent,
}

impl EventEnvelope {
    /// Wraps an event, stamping it with the current time.
    pub fn new(seller_id: &SellerId, product_id: Option<ProductId>, event: ProductEvent) -> Self {
        Self {
            ts: Utc::now(),
            seller_id: seller_id.clone(),
            product_id,
            event,
        }
    }

    pub fn created(seller_id: &SellerId, product: &Product) -> Self {
        Self::new(
            seller_id,
            Some(product.id),
            ProductEvent::Created(ProductSnapshot::from(product)),
        )
    }

    pub fn updated(seller_id: &SellerId, product_id: ProductId, diff: ProductUpdated) -> Self {
        Self::new(seller_id, Some(product_id), ProductEvent::Updated(diff))
    }

    pub fn deleted(seller_id: &SellerId, product_id: ProductId) -> Self {
        Self::new(
            seller_id,
            Some(product_id),
            ProductEvent::Deleted(ProductDeleted { id: product_id }),
        )
    }

    pub fn low_stock(seller_id: &SellerId, warning: LowStockWarning) -> Self {
        Self::new(
            seller_id,
            Some(warning.id),
            ProductEvent::LowStockWarning(warning),
        )
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    /// Backbone key: `"<seller>:<product>"`, or the bare seller id for
    /// events not tied to a product.
    pub fn partition_key(&self) -> String {
        match self.product_id {
            Some(product_id) => partition_key(&self.seller_id, product_id),
            None => self.seller_id.to_string(),
        }
    }

    /// Emission time as written on the wire: RFC 3339 UTC with a fixed
    /// nine-digit fraction, so timestamps sort lexicographically.
    pub fn ts_string(&self) -> String {
        self.ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelopeRef<'a> {
    #[serde(rename = "type")]
    event_type: EventType,
    ts: String,
    seller_id: &'a SellerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_id: Option<ProductId>,
    payload: PayloadRef<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadRef<'a> {
    Created(&'a ProductSnapshot),
    Updated(&'a ProductUpdated),
    Deleted(&'a ProductDeleted),
    LowStockWarning(&'a LowStockWarning),
}

impl<'a> From<&'a ProductEvent> for PayloadRef<'a> {
    fn from(event: &'a ProductEvent) -> Self {
        match event {
            ProductEvent::Created(p) => PayloadRef::Created(p),
            ProductEvent::Updated(p) => PayloadRef::Updated(p),
            ProductEvent::Deleted(p) => PayloadRef::Deleted(p),
            ProductEvent::LowStockWarning(p) => PayloadRef::LowStockWarning(p),
        }
    }
}

impl Serialize for EventEnvelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelopeRef {
            event_type: self.event_type(),
            ts: self.ts_string(),
            seller_id: &self.seller_id,
            product_id: self.product_id,
            payload: PayloadRef::from(&self.event),
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(rename = "type")]
    event_type: EventType,
    ts: DateTime<Utc>,
    seller_id: SellerId,
    #[serde(default)]
    product_id: Option<ProductId>,
    payload: serde_json::Value,
}

impl TryFrom<WireEnvelope> for EventEnvelope {
    type Error = serde_json::Error;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        let payload = wire.payload;
        let event = match wire.event_type {
            EventType::Created => ProductEvent::Created(serde_json::from_value(payload)?),
            EventType::Updated => ProductEvent::Updated(serde_json::from_value(payload)?),
            EventType::Deleted => ProductEvent::Deleted(serde_json::from_value(payload)?),
            EventType::LowStockWarning => {
                ProductEvent::LowStockWarning(serde_json::from_value(payload)?)
            }
        };
        Ok(Self {
            ts: wire.ts,
            seller_id: wire.seller_id,
            product_id: wire.product_id,
            event,
        })
    }
}
