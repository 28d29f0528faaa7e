//! One handle over every service, for orchestrators and tooling.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use serde::Serialize;
use stock_store::{AuthoritativeStore, StockStore};

use crate::confirmation::ConfirmationService;
use crate::context::StockContext;
use crate::error::{ReservationError, Result};
use crate::fallback::FallbackReservationService;
use crate::lock::DistributedLock;
use crate::maintenance::MaintenanceService;
use crate::monitoring::{HealthReport, MemoryEstimate, MonitoringService, ReservationStats};
use crate::record::{ReservationRecord, ReservationStatus, TransitionOutcome};
use crate::reservation::{ReservationOutcome, StockReservationService};
use crate::rollback::RollbackService;
use crate::sync::SynchronizationService;

const REPORT_ACTIVITY_LIMIT: usize = 10;

/// Stock position of one product, for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStockReport {
    pub product_id: ProductId,
    pub current_stock: i64,
    pub has_pending_reservations: bool,
    /// The most recent reservations, newest first.
    pub recent_activity: Vec<ReservationRecord>,
    pub total_reservations: usize,
}

/// Operator overview of the whole key-space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDashboard {
    pub stock_levels: BTreeMap<ProductId, i64>,
    pub stats: ReservationStats,
    pub health: HealthReport,
    pub memory: MemoryEstimate,
    pub generated_at: DateTime<Utc>,
}

/// Facade wiring every service onto one shared context.
pub struct StockEngine<S, A> {
    ctx: Arc<StockContext<S, A>>,
    lock: DistributedLock<S, A>,
    reservations: StockReservationService<S, A>,
    confirmations: ConfirmationService<S, A>,
    rollbacks: RollbackService<S, A>,
    sync: SynchronizationService<S, A>,
    fallback: FallbackReservationService<S, A>,
    maintenance: MaintenanceService<S, A>,
    monitoring: MonitoringService<S, A>,
}

impl<S, A> Clone for StockEngine<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            lock: self.lock.clone(),
            reservations: self.reservations.clone(),
            confirmations: self.confirmations.clone(),
            rollbacks: self.rollbacks.clone(),
            sync: self.sync.clone(),
            fallback: self.fallback.clone(),
            maintenance: self.maintenance.clone(),
            monitoring: self.monitoring.clone(),
        }
    }
}

impl<S, A> StockEngine<S, A>
where
    S: StockStore + 'static,
    A: AuthoritativeStore + 'static,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        Self {
            lock: DistributedLock::new(Arc::clone(&ctx)),
            reservations: StockReservationService::new(Arc::clone(&ctx)),
            confirmations: ConfirmationService::new(Arc::clone(&ctx)),
            rollbacks: RollbackService::new(Arc::clone(&ctx)),
            sync: SynchronizationService::new(Arc::clone(&ctx)),
            fallback: FallbackReservationService::new(Arc::clone(&ctx)),
            maintenance: MaintenanceService::new(Arc::clone(&ctx)),
            monitoring: MonitoringService::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<StockContext<S, A>> {
        &self.ctx
    }

    pub fn lock(&self) -> &DistributedLock<S, A> {
        &self.lock
    }

    pub fn sync(&self) -> &SynchronizationService<S, A> {
        &self.sync
    }

    pub fn fallback(&self) -> &FallbackReservationService<S, A> {
        &self.fallback
    }

    pub fn maintenance(&self) -> &MaintenanceService<S, A> {
        &self.maintenance
    }

    pub fn monitoring(&self) -> &MonitoringService<S, A> {
        &self.monitoring
    }

    pub async fn reserve(
        &self,
        product_id: &ProductId,
        user_id: &UserId,
        quantity: u32,
    ) -> Result<ReservationOutcome> {
        self.reservations.reserve(product_id, user_id, quantity).await
    }

    pub async fn confirm(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<TransitionOutcome> {
        self.confirmations.confirm(user_id, product_id).await
    }

    pub async fn rollback(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<TransitionOutcome> {
        self.rollbacks.rollback(user_id, product_id).await
    }

    pub async fn current_stock(&self, product_id: &ProductId) -> Result<i64> {
        self.sync.current(product_id).await
    }

    pub async fn multiple_stock(
        &self,
        product_ids: &[ProductId],
    ) -> Result<BTreeMap<ProductId, i64>> {
        self.sync.multiple(product_ids).await
    }

    /// Reserves on the fast path, switching to the authoritative store only
    /// when the fast path is unreachable.
    ///
    /// A fallback reservation holds no lock and writes no reservation
    /// record. After one succeeds the fast-path counter is re-synced on a
    /// best-effort basis.
    #[tracing::instrument(skip(self), fields(product_id = %product_id, user_id = %user_id))]
    pub async fn reserve_or_fallback(
        &self,
        product_id: &ProductId,
        user_id: &UserId,
        quantity: u32,
    ) -> Result<ReservationOutcome> {
        let error = match self.reservations.reserve(product_id, user_id, quantity).await {
            Err(ReservationError::StoreUnavailable(error)) => error,
            other => return other,
        };

        tracing::warn!(error = %error, "fast path unavailable, using authoritative fallback");
        let outcome = self.fallback.reserve(product_id, quantity).await?;

        if outcome.is_reserved()
            && let Err(e) = self.sync.reconcile(std::slice::from_ref(product_id)).await
        {
            tracing::debug!(error = %e, "post-fallback resync skipped");
        }
        Ok(outcome)
    }

    /// Current stock, pending flag, recent activity and reservation count.
    pub async fn product_report(&self, product_id: &ProductId) -> Result<ProductStockReport> {
        let current_stock = self.sync.current(product_id).await?;
        let activity = self.monitoring.activity(product_id).await?;
        let has_pending_reservations = activity
            .iter()
            .any(|r| r.status == ReservationStatus::Reserved);
        let total_reservations = activity.len();

        Ok(ProductStockReport {
            product_id: product_id.clone(),
            current_stock,
            has_pending_reservations,
            recent_activity: activity.into_iter().take(REPORT_ACTIVITY_LIMIT).collect(),
            total_reservations,
        })
    }

    /// Every stock level, reservation stats, a health probe and a memory
    /// estimate in one call.
    pub async fn dashboard(&self) -> Result<StockDashboard> {
        let (stock_levels, stats, health) = tokio::join!(
            self.sync.all_levels(),
            self.monitoring.stats(),
            self.monitoring.health_check()
        );
        let memory = MemoryEstimate::from_report(&health);

        Ok(StockDashboard {
            stock_levels: stock_levels?,
            stats: stats?,
            health,
            memory,
            generated_at: Utc::now(),
        })
    }
}
