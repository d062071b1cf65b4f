//! Inventory mutation engine.

use common::{ProductId, SellerId};
use event_bus::EventBus;
use product_store::{NewProduct, Product, ProductPatch, ProductStore, StoreError};

use crate::error::{DomainError, EmitError, Result};
use crate::events::{EventEnvelope, ProductUpdated, TOPIC};
use crate::low_stock::LowStockPolicy;

/// Applies product mutations to the store and emits the events they imply.
///
/// Every mutation writes the store first and only emits once the write is
/// committed. The primary event (`Created`, `Updated` or `Deleted`) is
/// published before any `LowStockWarning` derived from the same mutation, and
/// both use the `"<seller>:<product>"` key, so consumers see them in that
/// order. No lock is held across the store write and the publish.
pub struct ProductService<S: ProductStore, B: EventBus> {
    store: S,
    bus: B,
    policy: LowStockPolicy,
    topic: String,
}

impl<S: ProductStore, B: EventBus> ProductService<S, B> {
    /// Creates a service publishing on [`TOPIC`].
    pub fn new(store: S, bus: B, policy: LowStockPolicy) -> Self {
        Self {
            store,
            bus,
            policy,
            topic: TOPIC.to_string(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> LowStockPolicy {
        self.policy
    }

    /// Creates a product, then emits `Created` and, if stock is low,
    /// `LowStockWarning`.
    #[tracing::instrument(skip_all, fields(seller_id = %seller_id))]
    pub async fn create(&self, seller_id: &SellerId, input: NewProduct) -> Result<Product> {
        observe("create", self.try_create(seller_id, input).await)
    }

    /// Patches a product, then emits `Updated` and, if stock is low,
    /// `LowStockWarning`.
    ///
    /// Returns [`DomainError::NotFound`] without emitting anything when the
    /// seller owns no such product.
    #[tracing::instrument(skip_all, fields(seller_id = %seller_id, product_id = %product_id))]
    pub async fn update(
        &self,
        seller_id: &SellerId,
        product_id: ProductId,
        patch: ProductPatch,
    ) -> Result<Product> {
        observe("update", self.try_update(seller_id, product_id, patch).await)
    }

    /// Deletes a product, then emits `Deleted`.
    #[tracing::instrument(skip_all, fields(seller_id = %seller_id, product_id = %product_id))]
    pub async fn remove(&self, seller_id: &SellerId, product_id: ProductId) -> Result<ProductId> {
        observe("remove", self.try_remove(seller_id, product_id).await)
    }

    /// Lists the seller's products, newest first.
    #[tracing::instrument(skip_all, fields(seller_id = %seller_id))]
    pub async fn list(&self, seller_id: &SellerId) -> Result<Vec<Product>> {
        Ok(self.store.list(seller_id).await?)
    }

    async fn try_create(&self, seller_id: &SellerId, input: NewProduct) -> Result<Product> {
        input.validate()?;
        let product = self.store.create(seller_id, input).await?;

        self.emit(EventEnvelope::created(seller_id, &product)).await?;
        self.warn_if_low(seller_id, product.id, product.quantity).await?;

        Ok(product)
    }

    async fn try_update(
        &self,
        seller_id: &SellerId,
        product_id: ProductId,
        patch: ProductPatch,
    ) -> Result<Product> {
        patch.validate()?;
        let before = self
            .store
            .update(seller_id, product_id, &patch)
            .await?
            .ok_or(DomainError::NotFound)?;

        // Re-read so the event reflects what the store actually holds.
        let after = self
            .store
            .find(seller_id, product_id)
            .await?
            .ok_or(StoreError::Vanished(product_id))?;

        let diff = ProductUpdated::between(&before, &after);
        self.emit(EventEnvelope::updated(seller_id, product_id, diff)).await?;
        self.warn_if_low(seller_id, product_id, after.quantity).await?;

        Ok(after)
    }

    async fn try_remove(&self, seller_id: &SellerId, product_id: ProductId) -> Result<ProductId> {
        if self.store.delete(seller_id, product_id).await? == 0 {
            return Err(DomainError::NotFound);
        }

        self.emit(EventEnvelope::deleted(seller_id, product_id)).await?;
        Ok(product_id)
    }

    async fn warn_if_low(
        &self,
        seller_id: &SellerId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<()> {
        let Some(warning) = self.policy.warning_for(product_id, quantity) else {
            return Ok(());
        };

        self.emit(EventEnvelope::low_stock(seller_id, warning)).await?;
        metrics::counter!("low_stock_warnings_total").increment(1);
        tracing::info!(quantity, threshold = warning.threshold, "stock below threshold");
        Ok(())
    }

    async fn emit(&self, envelope: EventEnvelope) -> Result<()> {
        let event_type = envelope.event_type();
        let partition_key = envelope.partition_key();

        let published = match envelope.to_json() {
            Ok(json) => self
                .bus
                .publish(&self.topic, &partition_key, json.into_bytes())
                .await
                .map_err(EmitError::from),
            Err(e) => Err(EmitError::from(e)),
        };

        match published {
            Ok(()) => {
                metrics::counter!("events_published_total", "type" => event_type.as_str())
                    .increment(1);
                tracing::debug!(%event_type, %partition_key, "event emitted");
                Ok(())
            }
            Err(source) => {
                metrics::counter!("event_publish_failures_total", "type" => event_type.as_str())
                    .increment(1);
                tracing::error!(
                    %event_type,
                    %partition_key,
                    error = %source,
                    "event emission failed after committed write"
                );
                Err(DomainError::Emission {
                    event_type,
                    partition_key,
                    source,
                })
            }
        }
    }
}

/// Counts a finished mutation by outcome.
fn observe<T>(op: &'static str, result: Result<T>) -> Result<T> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(DomainError::NotFound) => "not_found",
        Err(DomainError::Validation(_)) => "invalid",
        Err(DomainError::Store(_)) => "store_failure",
        Err(DomainError::Emission { .. }) => "emission_failure",
    };
    metrics::counter!("product_mutations_total", "op" => op, "outcome" => outcome).increment(1);
    result
}
