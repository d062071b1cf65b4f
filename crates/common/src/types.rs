use serde::{Deserialize, Serialize};

/// Identifier of the seller (tenant) owning products and live subscriptions.
///
/// Every read and write in the system is scoped by a seller id; there is no
/// access path that crosses sellers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SellerId(String);

impl SellerId {
    /// Wraps a seller id coming from a trusted source (storage rows, event payloads).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses a seller id supplied by a client. Blank ids are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SellerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned identifier of a product, unique within a seller's namespace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    /// Creates a product id from its raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProductId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<ProductId> for i64 {
    fn from(id: ProductId) -> Self {
        id.0
    }
}

/// Backbone partition key for every event about one product: `"<seller>:<product>"`.
pub fn partition_key(seller_id: &SellerId, product_id: ProductId) -> String {
    format!("{seller_id}:{product_id}")
}
