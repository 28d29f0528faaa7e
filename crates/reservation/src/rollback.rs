use std::sync::Arc;

use chrono::Utc;
use common::{ProductId, UserId};
use stock_store::{AuthoritativeStore, StockStore, keys};

use crate::context::StockContext;
use crate::error::{ReservationError, Result};
use crate::ledger::ReservationLedger;
use crate::record::{ReservationStatus, TransitionOutcome};

/// Returns reserved stock to the counter.
pub struct RollbackService<S, A> {
    ctx: Arc<StockContext<S, A>>,
    ledger: ReservationLedger<S, A>,
}

impl<S, A> Clone for RollbackService<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, A> RollbackService<S, A>
where
    S: StockStore,
    A: AuthoritativeStore,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        let ledger = ReservationLedger::new(Arc::clone(&ctx));
        Self { ctx, ledger }
    }

    /// Rolls back the user's reservation of a product.
    ///
    /// Credits the reserved quantity back exactly once. Confirmed
    /// reservations are never re-credited.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn rollback(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<TransitionOutcome> {
        let Some(record) = self.ledger.load(user_id, product_id).await? else {
            tracing::warn!("no reservation to roll back");
            return Ok(TransitionOutcome::NotFound);
        };

        let rolled_back = match record.roll_back(Utc::now()) {
            Ok(rolled_back) => rolled_back,
            Err(ReservationError::UnsupportedTransition { current, .. }) => {
                if current == ReservationStatus::RolledBack {
                    tracing::debug!("reservation already rolled back");
                } else {
                    tracing::warn!(status = %current, "refusing to roll back reservation");
                }
                return Ok(TransitionOutcome::Unchanged(current));
            }
            Err(e) => return Err(e),
        };

        let level = self
            .ctx
            .store()
            .incr_by(&keys::stock_key(product_id), i64::from(record.quantity))
            .await?;

        if let Err(e) = self
            .ledger
            .save(&rolled_back, self.ctx.config().rolled_back_ttl)
            .await
        {
            tracing::error!(
                error = %e,
                quantity = record.quantity,
                "stock restored but reservation still marked reserved"
            );
            return Err(e);
        }

        metrics::counter!("stock_rollbacks_total").increment(1);
        tracing::info!(quantity = record.quantity, stock = level, "reservation rolled back");
        Ok(TransitionOutcome::Applied(rolled_back))
    }
}
