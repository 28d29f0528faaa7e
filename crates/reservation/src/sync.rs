//! Bridge between the authoritative store and the fast-path counters.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{AdminActor, ProductId};
use futures_util::TryStreamExt;
use stock_store::{AuthoritativeStore, StockStore, StockStoreExt, keys, scan_batches};

use crate::context::StockContext;
use crate::error::{ReservationError, Result};
use crate::lock::DistributedLock;

/// Reads, overwrites and hydrates `stock:{product}` counters.
pub struct SynchronizationService<S, A> {
    ctx: Arc<StockContext<S, A>>,
    lock: DistributedLock<S, A>,
}

impl<S, A> Clone for SynchronizationService<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            lock: self.lock.clone(),
        }
    }
}

impl<S, A> SynchronizationService<S, A>
where
    S: StockStore + 'static,
    A: AuthoritativeStore + 'static,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        let lock = DistributedLock::new(Arc::clone(&ctx));
        Self { ctx, lock }
    }

    /// Fills a missing counter from the authoritative store.
    ///
    /// Returns the quantity now available on the fast path. A missing
    /// product or a failed read yields 0 and leaves the counter unset, so
    /// the caller fails closed and the next request tries again.
    #[tracing::instrument(skip(self))]
    pub async fn hydrate(&self, product_id: &ProductId) -> i64 {
        match self.ctx.authoritative().read_quantity(product_id).await {
            Ok(Some(quantity)) => {
                let quantity = quantity.max(0);
                if let Err(e) = self
                    .ctx
                    .store()
                    .set(&keys::stock_key(product_id), &quantity.to_string())
                    .await
                {
                    tracing::error!(error = %e, "failed to cache hydrated stock");
                }
                metrics::counter!("stock_hydrations_total", "source" => "authoritative")
                    .increment(1);
                tracing::debug!(quantity, "stock hydrated from authoritative store");
                quantity
            }
            Ok(None) => {
                metrics::counter!("stock_hydrations_total", "source" => "missing").increment(1);
                tracing::debug!("product not found in authoritative store");
                0
            }
            Err(e) => {
                metrics::counter!("stock_hydrations_total", "source" => "error").increment(1);
                tracing::error!(error = %e, "authoritative read failed during hydration");
                0
            }
        }
    }

    /// Overwrites a counter with an authoritative value.
    #[tracing::instrument(skip(self))]
    pub async fn sync_from_authoritative(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<()> {
        ensure_level(quantity)?;
        self.ctx
            .store()
            .set(&keys::stock_key(product_id), &quantity.to_string())
            .await?;
        tracing::info!(quantity, "stock synced");
        Ok(())
    }

    /// Overwrites many counters in one pipelined batch.
    #[tracing::instrument(skip(self, levels), fields(count = levels.len()))]
    pub async fn bulk_sync(&self, levels: &[(ProductId, i64)]) -> Result<usize> {
        if levels.is_empty() {
            return Ok(0);
        }
        for (_, quantity) in levels {
            ensure_level(*quantity)?;
        }

        let pairs: Vec<(String, String)> = levels
            .iter()
            .map(|(id, qty)| (keys::stock_key(id), qty.to_string()))
            .collect();
        self.ctx.store().set_many(&pairs).await?;
        tracing::info!(count = pairs.len(), "stock bulk synced");
        Ok(pairs.len())
    }

    /// Loads every authoritative quantity into the fast path.
    #[tracing::instrument(skip(self))]
    pub async fn warmup(&self) -> Result<usize> {
        let levels: Vec<(ProductId, i64)> = self
            .ctx
            .authoritative()
            .all_quantities()
            .await?
            .into_iter()
            .map(|(id, qty)| (id, qty.max(0)))
            .collect();
        self.bulk_sync(&levels).await
    }

    /// Re-reads the given products from the authoritative store and
    /// overwrites their counters. Products missing there are skipped.
    #[tracing::instrument(skip(self, product_ids), fields(count = product_ids.len()))]
    pub async fn reconcile(&self, product_ids: &[ProductId]) -> Result<usize> {
        let mut levels = Vec::with_capacity(product_ids.len());
        for product_id in product_ids {
            if let Some(quantity) = self.ctx.authoritative().read_quantity(product_id).await? {
                levels.push((product_id.clone(), quantity.max(0)));
            }
        }
        self.bulk_sync(&levels).await
    }

    /// Current fast-path quantity; an absent counter reads as 0.
    pub async fn current(&self, product_id: &ProductId) -> Result<i64> {
        Ok(self
            .ctx
            .store()
            .get_counter(&keys::stock_key(product_id))
            .await?
            .unwrap_or(0))
    }

    /// Current quantities for several products in one round trip.
    pub async fn multiple(&self, product_ids: &[ProductId]) -> Result<BTreeMap<ProductId, i64>> {
        let keys: Vec<String> = product_ids.iter().map(keys::stock_key).collect();
        let values = self.ctx.store().mget(&keys).await?;

        Ok(product_ids
            .iter()
            .cloned()
            .zip(values)
            .map(|(id, raw)| {
                let quantity = raw.and_then(|v| v.trim().parse().ok()).unwrap_or(0);
                (id, quantity)
            })
            .collect())
    }

    /// Every counter currently on the fast path.
    pub async fn all_levels(&self) -> Result<BTreeMap<ProductId, i64>> {
        let store = self.ctx.store();
        let pattern = keys::all_stock_pattern();
        let mut batches = scan_batches(store, &pattern, self.ctx.config().scan_batch_size);
        let mut levels = BTreeMap::new();

        while let Some(batch) = batches.try_next().await? {
            let values = store.mget(&batch).await?;
            for (key, raw) in batch.iter().zip(values) {
                let Some(product_id) = keys::product_from_stock_key(key) else {
                    continue;
                };
                match raw.map(|v| v.trim().parse::<i64>()) {
                    Some(Ok(quantity)) => {
                        levels.insert(product_id, quantity);
                    }
                    Some(Err(_)) => tracing::warn!(%key, "skipping non-integer stock counter"),
                    None => {}
                }
            }
        }
        Ok(levels)
    }

    /// Admin edit: overwrites a counter.
    #[tracing::instrument(skip(self))]
    pub async fn set_level(&self, product_id: &ProductId, level: i64) -> Result<()> {
        ensure_level(level)?;
        self.ctx
            .store()
            .set(&keys::stock_key(product_id), &level.to_string())
            .await?;
        tracing::info!(level, "stock level set");
        Ok(())
    }

    /// Admin edit: overwrites a counter while holding the product lock, so
    /// it cannot interleave with an in-flight reservation.
    #[tracing::instrument(skip(self, admin), fields(admin = %admin))]
    pub async fn set_level_with_lock(
        &self,
        product_id: &ProductId,
        level: i64,
        admin: &AdminActor,
    ) -> Result<()> {
        ensure_level(level)?;
        let Some(guard) = self.lock.try_acquire(product_id, admin.id()).await? else {
            return Err(ReservationError::Contention {
                product_id: product_id.clone(),
            });
        };

        let result = self
            .ctx
            .store()
            .set(&keys::stock_key(product_id), &level.to_string())
            .await;
        guard.release().await;
        result?;

        tracing::warn!(level, "stock level overridden");
        Ok(())
    }

    /// Admin edit: adds to a counter.
    #[tracing::instrument(skip(self))]
    pub async fn increment(&self, product_id: &ProductId, by: i64) -> Result<i64> {
        ensure_positive(by)?;
        let level = self
            .ctx
            .store()
            .incr_by(&keys::stock_key(product_id), by)
            .await?;
        tracing::info!(level, "stock incremented");
        Ok(level)
    }

    /// Admin edit: subtracts from a counter.
    ///
    /// A decrement that would drive the counter below zero is undone and
    /// reported as insufficient stock.
    #[tracing::instrument(skip(self))]
    pub async fn decrement(&self, product_id: &ProductId, by: i64) -> Result<i64> {
        ensure_positive(by)?;
        let key = keys::stock_key(product_id);
        let level = self.ctx.store().decr_by(&key, by).await?;

        if level < 0 {
            let restored = self.ctx.store().incr_by(&key, by).await?;
            return Err(ReservationError::InsufficientStock {
                product_id: product_id.clone(),
                available: restored,
                requested: u32::try_from(by).unwrap_or(u32::MAX),
            });
        }

        tracing::info!(level, "stock decremented");
        Ok(level)
    }
}

fn ensure_level(level: i64) -> Result<()> {
    if level < 0 {
        return Err(ReservationError::InvalidQuantity(level));
    }
    Ok(())
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(ReservationError::InvalidQuantity(amount));
    }
    Ok(())
}
