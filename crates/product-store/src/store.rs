use std::sync::Arc;

use async_trait::async_trait;

use crate::{NewProduct, Product, ProductId, ProductPatch, Result, SellerId};

/// Tenant-scoped product persistence.
///
/// Every operation is keyed by `(seller_id, product_id)`; a product owned by
/// another seller behaves exactly like a missing one. Updates and deletes are
/// conditional on that composite key, so an ownership check never needs a
/// separate read-then-write.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Inserts a new product, assigning its id and timestamps.
    async fn create(&self, seller_id: &SellerId, product: NewProduct) -> Result<Product>;

    /// Lists the seller's products, newest (highest id) first.
    async fn list(&self, seller_id: &SellerId) -> Result<Vec<Product>>;

    /// Loads one product.
    ///
    /// Returns None if the product doesn't exist for this seller.
    async fn find(&self, seller_id: &SellerId, product_id: ProductId) -> Result<Option<Product>>;

    /// Applies a patch if `(seller_id, product_id)` matches a row.
    ///
    /// Returns the pre-update state of the matched row, or None when zero rows
    /// matched.
    async fn update(
        &self,
        seller_id: &SellerId,
        product_id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>>;

    /// Deletes the product if `(seller_id, product_id)` matches a row.
    ///
    /// Returns the number of rows removed (0 or 1).
    async fn delete(&self, seller_id: &SellerId, product_id: ProductId) -> Result<u64>;
}

#[async_trait]
impl<T: ProductStore + ?Sized> ProductStore for Arc<T> {
    async fn create(&self, seller_id: &SellerId, product: NewProduct) -> Result<Product> {
        (**self).create(seller_id, product).await
    }

    async fn list(&self, seller_id: &SellerId) -> Result<Vec<Product>> {
        (**self).list(seller_id).await
    }

    async fn find(&self, seller_id: &SellerId, product_id: ProductId) -> Result<Option<Product>> {
        (**self).find(seller_id, product_id).await
    }

    async fn update(
        &self,
        seller_id: &SellerId,
        product_id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>> {
        (**self).update(seller_id, product_id, patch).await
    }

    async fn delete(&self, seller_id: &SellerId, product_id: ProductId) -> Result<u64> {
        (**self).delete(seller_id, product_id).await
    }
}
