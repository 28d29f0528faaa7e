//! The system of record for product stock.
//!
//! The engine only ever asks two things of it: the current quantity (on a
//! fast-path cache miss) and an atomic conditional update (in degraded
//! mode when the fast-path store is down).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::ProductId;
use tokio::sync::RwLock;

use crate::{Result, StoreError};

/// Guard evaluated atomically with a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePrecondition {
    /// Apply unconditionally.
    None,
    /// Apply only if the current quantity is at least this value.
    AtLeast(i64),
}

impl UpdatePrecondition {
    /// Returns true if `current` satisfies the precondition.
    pub fn holds(&self, current: i64) -> bool {
        match self {
            UpdatePrecondition::None => true,
            UpdatePrecondition::AtLeast(min) => current >= *min,
        }
    }

    /// Lower bound for SQL binding; `None` when unconditional.
    pub fn min_required(&self) -> Option<i64> {
        match self {
            UpdatePrecondition::None => None,
            UpdatePrecondition::AtLeast(min) => Some(*min),
        }
    }
}

/// Authoritative stock backend.
#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    /// Reads the authoritative quantity for a product.
    ///
    /// Returns None if the product does not exist.
    async fn read_quantity(&self, product_id: &ProductId) -> Result<Option<i64>>;

    /// Adds `delta` to the product's quantity if `precondition` holds.
    ///
    /// The check and the write happen atomically inside the backend.
    /// Returns the new quantity when the update applied, None otherwise
    /// (precondition failed or product missing).
    async fn conditional_update(
        &self,
        product_id: &ProductId,
        delta: i64,
        precondition: UpdatePrecondition,
    ) -> Result<Option<i64>>;

    /// Reads every product's quantity, for bulk warmup.
    async fn all_quantities(&self) -> Result<Vec<(ProductId, i64)>>;
}

/// In-memory authoritative store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuthoritativeStore {
    products: Arc<RwLock<HashMap<ProductId, i64>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryAuthoritativeStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the given quantities.
    pub fn with_products<I, P>(products: I) -> Self
    where
        I: IntoIterator<Item = (P, i64)>,
        P: Into<ProductId>,
    {
        let map = products
            .into_iter()
            .map(|(id, qty)| (id.into(), qty))
            .collect();
        Self {
            products: Arc::new(RwLock::new(map)),
            unavailable: Arc::default(),
        }
    }

    /// Sets a product's quantity directly.
    pub async fn set_quantity(&self, product_id: impl Into<ProductId>, quantity: i64) {
        self.products
            .write()
            .await
            .insert(product_id.into(), quantity);
    }

    /// Returns a product's quantity without going through the trait.
    pub async fn quantity(&self, product_id: &ProductId) -> Option<i64> {
        self.products.read().await.get(product_id).copied()
    }

    /// Simulates a database outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "authoritative store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthoritativeStore for InMemoryAuthoritativeStore {
    async fn read_quantity(&self, product_id: &ProductId) -> Result<Option<i64>> {
        self.check_available()?;
        Ok(self.products.read().await.get(product_id).copied())
    }

    async fn conditional_update(
        &self,
        product_id: &ProductId,
        delta: i64,
        precondition: UpdatePrecondition,
    ) -> Result<Option<i64>> {
        self.check_available()?;
        let mut products = self.products.write().await;
        let Some(current) = products.get_mut(product_id) else {
            return Ok(None);
        };
        if !precondition.holds(*current) {
            return Ok(None);
        }
        *current += delta;
        Ok(Some(*current))
    }

    async fn all_quantities(&self) -> Result<Vec<(ProductId, i64)>> {
        self.check_available()?;
        let mut all: Vec<_> = self
            .products
            .read()
            .await
            .iter()
            .map(|(id, qty)| (id.clone(), *qty))
            .collect();
        all.sort();
        Ok(all)
    }
}
