//! Degraded-mode reservations straight against the authoritative store.
//!
//! Used only when the fast-path store is unreachable. There is no
//! distributed lock and no reservation record here: the single conditional
//! update is the whole guarantee.

use std::sync::Arc;

use common::ProductId;
use stock_store::{AuthoritativeStore, StockStore, UpdatePrecondition};

use crate::context::StockContext;
use crate::error::{ReservationError, Result};
use crate::reservation::{ReservationOutcome, ReservationPath};

pub struct FallbackReservationService<S, A> {
    ctx: Arc<StockContext<S, A>>,
}

impl<S, A> Clone for FallbackReservationService<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<S, A> FallbackReservationService<S, A>
where
    S: StockStore,
    A: AuthoritativeStore,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        Self { ctx }
    }

    /// Decrements authoritative stock if at least `quantity` is available.
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    pub async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReservationOutcome> {
        if quantity == 0 {
            return Err(ReservationError::InvalidQuantity(0));
        }
        let requested = i64::from(quantity);
        tracing::warn!(quantity, "reserving against authoritative store");

        let authoritative = self.ctx.authoritative();
        let outcome = match authoritative
            .conditional_update(product_id, -requested, UpdatePrecondition::AtLeast(requested))
            .await?
        {
            Some(remaining) => ReservationOutcome::Reserved {
                product_id: product_id.clone(),
                remaining_stock: remaining,
                path: ReservationPath::Fallback,
            },
            None => {
                let available = authoritative.read_quantity(product_id).await?.unwrap_or(0);
                ReservationOutcome::InsufficientStock {
                    product_id: product_id.clone(),
                    available,
                    requested: quantity,
                }
            }
        };

        metrics::counter!("stock_fallback_reservations_total", "outcome" => outcome.label())
            .increment(1);
        tracing::info!(outcome = outcome.label(), "fallback reservation finished");
        Ok(outcome)
    }
}
