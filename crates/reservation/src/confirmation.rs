use std::sync::Arc;

use chrono::Utc;
use common::{ProductId, UserId};
use stock_store::{AuthoritativeStore, StockStore};

use crate::context::StockContext;
use crate::error::{ReservationError, Result};
use crate::ledger::ReservationLedger;
use crate::record::{ReservationStatus, TransitionOutcome};

/// Marks reservations as confirmed. Never touches stock counters.
pub struct ConfirmationService<S, A> {
    ctx: Arc<StockContext<S, A>>,
    ledger: ReservationLedger<S, A>,
}

impl<S, A> Clone for ConfirmationService<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, A> ConfirmationService<S, A>
where
    S: StockStore,
    A: AuthoritativeStore,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        let ledger = ReservationLedger::new(Arc::clone(&ctx));
        Self { ctx, ledger }
    }

    /// Confirms the user's reservation of a product.
    ///
    /// Missing records and records already past `reserved` are left alone.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn confirm(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<TransitionOutcome> {
        let Some(record) = self.ledger.load(user_id, product_id).await? else {
            tracing::warn!("no reservation to confirm");
            return Ok(TransitionOutcome::NotFound);
        };

        let confirmed = match record.confirm(Utc::now()) {
            Ok(confirmed) => confirmed,
            Err(ReservationError::UnsupportedTransition { current, .. }) => {
                if current == ReservationStatus::Confirmed {
                    tracing::debug!("reservation already confirmed");
                } else {
                    tracing::warn!(status = %current, "cannot confirm reservation");
                }
                return Ok(TransitionOutcome::Unchanged(current));
            }
            Err(e) => return Err(e),
        };

        self.ledger
            .save(&confirmed, self.ctx.config().confirmed_ttl)
            .await?;

        metrics::counter!("stock_confirmations_total").increment(1);
        tracing::info!(quantity = confirmed.quantity, "reservation confirmed");
        Ok(TransitionOutcome::Applied(confirmed))
    }
}
