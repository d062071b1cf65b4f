use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    NewProduct, Product, ProductId, ProductPatch, Result, SellerId, StoreError,
    store::ProductStore,
};

#[derive(Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    last_id: i64,
    failure: Option<String>,
    /// Calls still served before `failure` applies.
    failure_after: AtomicUsize,
}

impl State {
    fn check_available(&self) -> Result<()> {
        let Some(reason) = &self.failure else {
            return Ok(());
        };
        let spared = self
            .failure_after
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if spared {
            Ok(())
        } else {
            Err(StoreError::Unavailable(reason.clone()))
        }
    }

    fn owned(&self, seller_id: &SellerId, product_id: ProductId) -> Option<&Product> {
        self.products
            .get(&product_id)
            .filter(|p| &p.seller_id == seller_id)
    }
}

/// In-memory product store for tests and single-process runs.
///
/// Ids are assigned from one global sequence, like a database serial column.
#[derive(Clone, Default)]
pub struct InMemoryProductStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryProductStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable` until
    /// cleared with `None`.
    pub async fn set_failure(&self, reason: Option<&str>) {
        self.fail_after(reason, 0).await;
    }

    /// Like [`set_failure`](Self::set_failure), but lets `after` more calls
    /// succeed first.
    pub async fn fail_after(&self, reason: Option<&str>, after: usize) {
        let mut state = self.state.write().await;
        state.failure = reason.map(str::to_string);
        *state.failure_after.get_mut() = after;
    }

    /// Returns the total number of products stored, across sellers.
    pub async fn product_count(&self) -> usize {
        self.state.read().await.products.len()
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn create(&self, seller_id: &SellerId, product: NewProduct) -> Result<Product> {
        let mut state = self.state.write().await;
        state.check_available()?;

        state.last_id += 1;
        let now = Utc::now();
        let created = Product {
            id: ProductId::new(state.last_id),
            seller_id: seller_id.clone(),
            name: product.name,
            description: product.description,
            price: product.price,
            quantity: product.quantity,
            category: product.category,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list(&self, seller_id: &SellerId) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        state.check_available()?;

        Ok(state
            .products
            .values()
            .rev()
            .filter(|p| &p.seller_id == seller_id)
            .cloned()
            .collect())
    }

    async fn find(&self, seller_id: &SellerId, product_id: ProductId) -> Result<Option<Product>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.owned(seller_id, product_id).cloned())
    }

    async fn update(
        &self,
        seller_id: &SellerId,
        product_id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Option<Product>> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let Some(before) = state.owned(seller_id, product_id).cloned() else {
            return Ok(None);
        };

        let mut after = before.clone();
        patch.apply_to(&mut after);
        after.updated_at = Utc::now();
        state.products.insert(product_id, after);

        Ok(Some(before))
    }

    async fn delete(&self, seller_id: &SellerId, product_id: ProductId) -> Result<u64> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if state.owned(seller_id, product_id).is_none() {
            return Ok(0);
        }
        state.products.remove(&product_id);
        Ok(1)
    }
}
