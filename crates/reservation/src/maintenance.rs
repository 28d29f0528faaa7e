//! Sweeps and administrative cleanup of the fast-path key-space.

use std::sync::Arc;

use chrono::Utc;
use common::{AdminActor, ProductId, UserId};
use serde::Serialize;
use stock_store::{AuthoritativeStore, StockStore, StockStoreExt, keys};

use crate::context::StockContext;
use crate::error::{ReservationError, Result};
use crate::ledger::{LedgerEntry, ReservationLedger, ReservationScope, ScannedEntry};

/// Counts from one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records examined.
    pub scanned: usize,
    /// Records deleted for being older than the max age.
    pub expired: usize,
    /// Records deleted because they could not be decoded.
    pub malformed: usize,
    /// Doomed records rewritten before their delete ran, left in place.
    pub superseded: usize,
}

impl SweepReport {
    pub fn deleted(&self) -> usize {
        self.expired + self.malformed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Doom {
    Expired,
    Malformed,
}

/// A key to delete, together with the value it must still hold.
struct Doomed {
    key: String,
    raw: String,
    reason: Doom,
}

pub struct MaintenanceService<S, A> {
    ctx: Arc<StockContext<S, A>>,
    ledger: ReservationLedger<S, A>,
}

impl<S, A> Clone for MaintenanceService<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, A> MaintenanceService<S, A>
where
    S: StockStore,
    A: AuthoritativeStore,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        let ledger = ReservationLedger::new(Arc::clone(&ctx));
        Self { ctx, ledger }
    }

    /// Deletes reservation records older than the configured max age,
    /// whatever their status, plus any record that cannot be decoded.
    ///
    /// Records are decoded one scan page at a time and deleted once the scan
    /// completes. A delete only applies if the key still holds the value
    /// that was scanned, so a reservation written in between survives.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let max_age = self.ctx.config().sweep_max_age;
        let mut report = SweepReport::default();
        let mut doomed = Vec::new();

        self.ledger
            .for_each_batch(&keys::all_reservations_pattern(), |entries| {
                for ScannedEntry { key, raw, entry } in entries {
                    report.scanned += 1;
                    let reason = match entry {
                        LedgerEntry::Record(record) => {
                            let age = record.age(now).to_std().unwrap_or_default();
                            if age <= max_age {
                                continue;
                            }
                            Doom::Expired
                        }
                        LedgerEntry::Malformed { reason, .. } => {
                            tracing::warn!(%key, %reason, "deleting malformed reservation record");
                            Doom::Malformed
                        }
                    };
                    doomed.push(Doomed { key, raw, reason });
                }
                Ok(())
            })
            .await?;

        for Doomed { key, raw, reason } in doomed {
            if !self.ctx.store().delete_if_equals(&key, &raw).await? {
                tracing::debug!(%key, "reservation changed since scan, keeping it");
                report.superseded += 1;
                continue;
            }
            match reason {
                Doom::Expired => report.expired += 1,
                Doom::Malformed => report.malformed += 1,
            }
        }

        metrics::counter!("stock_sweep_deleted_total").increment(report.deleted() as u64);
        tracing::info!(
            scanned = report.scanned,
            expired = report.expired,
            malformed = report.malformed,
            superseded = report.superseded,
            "reservation sweep finished"
        );
        Ok(report)
    }

    /// Deletes every reservation record for a product.
    ///
    /// Records that cannot be decoded are left for the sweep, since their
    /// product cannot be confirmed from the key alone.
    #[tracing::instrument(skip(self, admin), fields(admin = %admin))]
    pub async fn cleanup_by_product(
        &self,
        product_id: &ProductId,
        admin: &AdminActor,
    ) -> Result<u64> {
        let removed = self
            .delete_in_scope(ReservationScope::Product(product_id))
            .await?;
        tracing::warn!(removed, "reservations removed for product");
        Ok(removed)
    }

    /// Deletes every reservation record for a user.
    #[tracing::instrument(skip(self, admin), fields(admin = %admin))]
    pub async fn cleanup_by_user(&self, user_id: &UserId, admin: &AdminActor) -> Result<u64> {
        let removed = self.delete_in_scope(ReservationScope::User(user_id)).await?;
        tracing::warn!(removed, "reservations removed for user");
        Ok(removed)
    }

    /// Deletes every stock counter, lock and reservation record.
    ///
    /// Refused unless resets are enabled in the configuration.
    #[tracing::instrument(skip(self, admin), fields(admin = %admin))]
    pub async fn reset_all(&self, admin: &AdminActor) -> Result<u64> {
        if !self.ctx.config().allow_reset {
            tracing::warn!("reset refused, resets are disabled");
            return Err(ReservationError::Forbidden(
                "resetting the stock key-space is disabled".to_string(),
            ));
        }

        let batch = self.ctx.config().scan_batch_size;
        let store = self.ctx.store();
        let mut doomed = Vec::new();
        for pattern in [
            keys::all_stock_pattern(),
            keys::all_locks_pattern(),
            keys::all_reservations_pattern(),
        ] {
            doomed.extend(store.collect_keys(&pattern, batch).await?);
        }

        tracing::warn!(key_count = doomed.len(), "resetting all stock keys");
        let mut removed = 0;
        for chunk in doomed.chunks(batch) {
            removed += store.del(chunk).await?;
        }
        tracing::warn!(removed, "stock key-space reset");
        Ok(removed)
    }

    async fn delete_in_scope(&self, scope: ReservationScope<'_>) -> Result<u64> {
        let mut doomed = Vec::new();
        self.ledger
            .for_each_batch(&scope.pattern(), |entries| {
                for ScannedEntry { key, raw, entry } in entries {
                    if let LedgerEntry::Record(record) = entry
                        && scope.includes(&record)
                    {
                        doomed.push((key, raw));
                    }
                }
                Ok(())
            })
            .await?;

        let mut removed = 0;
        for (key, raw) in doomed {
            if self.ctx.store().delete_if_equals(&key, &raw).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
