//! The reserve path: lock, read, check, decrement, record, unlock.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{ProductId, UserId};
use stock_store::{AuthoritativeStore, StockStore, StockStoreExt, keys};

use crate::context::StockContext;
use crate::error::{ReservationError, Result};
use crate::ledger::ReservationLedger;
use crate::lock::DistributedLock;
use crate::record::ReservationRecord;
use crate::sync::SynchronizationService;

/// Which store served a successful reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationPath {
    /// Locked counter on the fast-path store.
    FastPath,
    /// Conditional update on the authoritative store (degraded mode).
    Fallback,
}

/// Business result of a reserve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Stock was held.
    Reserved {
        product_id: ProductId,
        remaining_stock: i64,
        path: ReservationPath,
    },
    /// Another request holds the product lock. Nothing was mutated.
    Contended { product_id: ProductId },
    /// Not enough stock.
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: u32,
    },
}

impl ReservationOutcome {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReservationOutcome::Reserved { .. })
    }

    /// Remaining stock after a successful reservation.
    pub fn remaining_stock(&self) -> Option<i64> {
        match self {
            ReservationOutcome::Reserved {
                remaining_stock, ..
            } => Some(*remaining_stock),
            _ => None,
        }
    }

    /// Label used for the `outcome` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            ReservationOutcome::Reserved { .. } => "reserved",
            ReservationOutcome::Contended { .. } => "contended",
            ReservationOutcome::InsufficientStock { .. } => "insufficient_stock",
        }
    }

    /// Converts rejections into errors, for callers that want `?`.
    pub fn into_result(self) -> Result<i64> {
        match self {
            ReservationOutcome::Reserved {
                remaining_stock, ..
            } => Ok(remaining_stock),
            ReservationOutcome::Contended { product_id } => {
                Err(ReservationError::Contention { product_id })
            }
            ReservationOutcome::InsufficientStock {
                product_id,
                available,
                requested,
            } => Err(ReservationError::InsufficientStock {
                product_id,
                available,
                requested,
            }),
        }
    }
}

/// Reserves stock on the fast path under the per-product lock.
pub struct StockReservationService<S, A> {
    ctx: Arc<StockContext<S, A>>,
    lock: DistributedLock<S, A>,
    ledger: ReservationLedger<S, A>,
    sync: SynchronizationService<S, A>,
}

impl<S, A> Clone for StockReservationService<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            lock: self.lock.clone(),
            ledger: self.ledger.clone(),
            sync: self.sync.clone(),
        }
    }
}

impl<S, A> StockReservationService<S, A>
where
    S: StockStore + 'static,
    A: AuthoritativeStore + 'static,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        Self {
            lock: DistributedLock::new(Arc::clone(&ctx)),
            ledger: ReservationLedger::new(Arc::clone(&ctx)),
            sync: SynchronizationService::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// Reserves `quantity` units of a product for a user.
    ///
    /// Contention and insufficient stock are returned as outcomes. An `Err`
    /// means a store failed on the critical path; the counter is left as it
    /// was before the call.
    #[tracing::instrument(skip(self), fields(product_id = %product_id, user_id = %user_id))]
    pub async fn reserve(
        &self,
        product_id: &ProductId,
        user_id: &UserId,
        quantity: u32,
    ) -> Result<ReservationOutcome> {
        if quantity == 0 {
            return Err(ReservationError::InvalidQuantity(0));
        }
        let started = Instant::now();

        let Some(guard) = self.lock.try_acquire(product_id, user_id.as_str()).await? else {
            metrics::counter!("stock_reservations_total", "outcome" => "contended").increment(1);
            tracing::info!("reservation contended");
            return Ok(ReservationOutcome::Contended {
                product_id: product_id.clone(),
            });
        };

        let result = self.reserve_locked(product_id, user_id, quantity).await;
        guard.release().await;

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        metrics::counter!("stock_reservations_total", "outcome" => outcome).increment(1);
        metrics::histogram!("stock_reserve_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn reserve_locked(
        &self,
        product_id: &ProductId,
        user_id: &UserId,
        quantity: u32,
    ) -> Result<ReservationOutcome> {
        let store = self.ctx.store();
        let key = keys::stock_key(product_id);
        let requested = i64::from(quantity);

        let available = match store.get_counter(&key).await? {
            Some(available) => available,
            None => self.sync.hydrate(product_id).await,
        };

        if available < requested {
            tracing::info!(available, requested, "insufficient stock");
            return Ok(ReservationOutcome::InsufficientStock {
                product_id: product_id.clone(),
                available,
                requested: quantity,
            });
        }

        let remaining = store.decr_by(&key, requested).await?;

        let record =
            ReservationRecord::new(product_id.clone(), user_id.clone(), quantity, Utc::now());
        if let Err(e) = self
            .ledger
            .save(&record, self.ctx.config().reservation_ttl)
            .await
        {
            tracing::error!(error = %e, "reservation record write failed, restoring stock");
            if let Err(restore) = store.incr_by(&key, requested).await {
                tracing::error!(error = %restore, quantity, "failed to restore stock");
            }
            return Err(e);
        }

        tracing::info!(quantity, remaining_stock = remaining, "stock reserved");
        Ok(ReservationOutcome::Reserved {
            product_id: product_id.clone(),
            remaining_stock: remaining,
            path: ReservationPath::FastPath,
        })
    }
}
