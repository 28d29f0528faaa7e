//! Maintenance daemon for the stock reservation engine.
//!
//! Warms the fast path from the authoritative store at boot, then runs a
//! sweep and a health probe on a fixed interval until shutdown.

pub mod config;
pub mod error;

use std::future::Future;
use std::time::Duration;

use reservation::{HealthReport, HealthStatus, StockEngine, SweepReport};
use stock_store::{AuthoritativeStore, StockStore};
use tokio::time::MissedTickBehavior;

pub use config::{Config, LogFormat, LogSettings};
pub use error::{Result, WorkerError};

/// What one maintenance cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// `None` if the sweep failed; the failure is logged.
    pub sweep: Option<SweepReport>,
    pub health: HealthReport,
}

/// Drives periodic maintenance over a [`StockEngine`].
pub struct MaintenanceWorker<S, A> {
    engine: StockEngine<S, A>,
    interval: Duration,
}

impl<S, A> MaintenanceWorker<S, A>
where
    S: StockStore + 'static,
    A: AuthoritativeStore + 'static,
{
    pub fn new(engine: StockEngine<S, A>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub fn engine(&self) -> &StockEngine<S, A> {
        &self.engine
    }

    /// Loads every authoritative quantity into the fast path.
    #[tracing::instrument(skip(self))]
    pub async fn warmup(&self) -> Result<usize> {
        let count = self.engine.sync().warmup().await?;
        tracing::info!(count, "fast path warmed up");
        Ok(count)
    }

    /// Runs one sweep followed by one health probe.
    ///
    /// A failed sweep does not stop the probe.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleReport {
        let sweep = match self.engine.maintenance().sweep_expired().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "sweep failed");
                None
            }
        };

        let health = self.engine.monitoring().health_check().await;
        record_health(&health);
        match health.status {
            HealthStatus::Healthy => tracing::debug!("store healthy"),
            HealthStatus::Warning => tracing::warn!(issues = ?health.issues, "store degraded"),
            HealthStatus::Error => tracing::error!(issues = ?health.issues, "store unhealthy"),
        }

        CycleReport { sweep, health }
    }

    /// Runs a cycle on every tick until `shutdown` resolves.
    ///
    /// The first cycle runs immediately. Returns the number of cycles run.
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut cycles = 0;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(cycles, "maintenance loop stopping");
                    return cycles;
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                    cycles += 1;
                }
            }
        }
    }
}

fn record_health(report: &HealthReport) {
    metrics::gauge!("stock_keys", "class" => "stock").set(report.stock_keys as f64);
    metrics::gauge!("stock_keys", "class" => "reservation").set(report.reservation_keys as f64);
    metrics::gauge!("stock_keys", "class" => "lock").set(report.lock_keys as f64);
    metrics::gauge!("stock_stale_reservations").set(report.stale_reservations as f64);
    metrics::gauge!("stock_store_healthy").set(if report.store && report.operations {
        1.0
    } else {
        0.0
    });
}
