//! Read-only views over reservations plus a store health probe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ProductId;
use serde::Serialize;
use stock_store::{AuthoritativeStore, StockStore, StockStoreExt, keys};
use uuid::Uuid;

use crate::context::StockContext;
use crate::error::Result;
use crate::ledger::{LedgerEntry, ReservationLedger, ReservationScope};
use crate::record::{ReservationRecord, ReservationStatus};

const HEALTH_PROBE_PREFIX: &str = "health_check:";
const HEALTH_PROBE_TTL: Duration = Duration::from_secs(10);

/// Average footprint of a counter key, in bytes.
const STOCK_KEY_BYTES: u64 = 50;
/// Average footprint of a reservation record, in bytes.
const RESERVATION_KEY_BYTES: u64 = 200;

/// Per-status tallies across every reservation record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReservationStats {
    pub total: usize,
    pub reserved: usize,
    pub confirmed: usize,
    pub rolled_back: usize,
    /// Units currently held by `reserved` records.
    pub reserved_quantity: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    /// The store answered a ping.
    pub store: bool,
    /// A write/read/delete round trip succeeded.
    pub operations: bool,
    pub stock_keys: usize,
    pub reservation_keys: usize,
    pub lock_keys: usize,
    pub stale_reservations: usize,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Rough size of the engine's key-space, from average per-key footprints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEstimate {
    pub stock_keys: usize,
    pub reservation_keys: usize,
    pub estimated_bytes: u64,
}

impl MemoryEstimate {
    pub fn from_report(report: &HealthReport) -> Self {
        let estimated_bytes = report.stock_keys as u64 * STOCK_KEY_BYTES
            + report.reservation_keys as u64 * RESERVATION_KEY_BYTES;
        Self {
            stock_keys: report.stock_keys,
            reservation_keys: report.reservation_keys,
            estimated_bytes,
        }
    }
}

impl HealthReport {
    fn failed(store: bool, issue: String) -> Self {
        Self {
            status: HealthStatus::Error,
            store,
            operations: false,
            stock_keys: 0,
            reservation_keys: 0,
            lock_keys: 0,
            stale_reservations: 0,
            issues: vec![issue],
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

pub struct MonitoringService<S, A> {
    ctx: Arc<StockContext<S, A>>,
    ledger: ReservationLedger<S, A>,
}

impl<S, A> Clone for MonitoringService<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S, A> MonitoringService<S, A>
where
    S: StockStore,
    A: AuthoritativeStore,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        let ledger = ReservationLedger::new(Arc::clone(&ctx));
        Self { ctx, ledger }
    }

    /// Every reservation of a product, newest first.
    pub async fn activity(&self, product_id: &ProductId) -> Result<Vec<ReservationRecord>> {
        let mut records = self
            .ledger
            .records_in(ReservationScope::Product(product_id))
            .await?;
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Reservations across all products, newest first, capped at `limit`
    /// (the configured activity limit when `None`).
    pub async fn all_activity(&self, limit: Option<usize>) -> Result<Vec<ReservationRecord>> {
        let mut records = self
            .ledger
            .records_matching(&keys::all_reservations_pattern())
            .await?;
        sort_newest_first(&mut records);
        records.truncate(limit.unwrap_or(self.ctx.config().activity_limit));
        Ok(records)
    }

    /// Reservations still in `reserved`, newest first, capped at `limit`.
    pub async fn active_reservations(&self, limit: usize) -> Result<Vec<ReservationRecord>> {
        let mut records: Vec<_> = self
            .ledger
            .records_matching(&keys::all_reservations_pattern())
            .await?
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Reserved)
            .collect();
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    /// True if any user holds a `reserved` record for the product.
    pub async fn has_pending_reservations(&self, product_id: &ProductId) -> Result<bool> {
        Ok(self
            .ledger
            .records_in(ReservationScope::Product(product_id))
            .await?
            .iter()
            .any(|r| r.status == ReservationStatus::Reserved))
    }

    pub async fn stats(&self) -> Result<ReservationStats> {
        let records = self
            .ledger
            .records_matching(&keys::all_reservations_pattern())
            .await?;

        let mut stats = ReservationStats {
            total: records.len(),
            ..ReservationStats::default()
        };
        for record in &records {
            match record.status {
                ReservationStatus::Reserved => {
                    stats.reserved += 1;
                    stats.reserved_quantity += u64::from(record.quantity);
                }
                ReservationStatus::Confirmed => stats.confirmed += 1,
                ReservationStatus::RolledBack => stats.rolled_back += 1,
            }
        }
        Ok(stats)
    }

    /// Probes the fast-path store.
    ///
    /// Never fails: unreachable stores and broken round trips are reported
    /// with status `Error`. Thresholds breached on held locks or stale
    /// reservations, and unreadable records, downgrade to `Warning`.
    #[tracing::instrument(skip(self))]
    pub async fn health_check(&self) -> HealthReport {
        let store = self.ctx.store();

        if let Err(e) = store.ping().await {
            tracing::error!(error = %e, "health check: store unreachable");
            return HealthReport::failed(false, format!("store unreachable: {e}"));
        }

        if let Err(e) = self.round_trip().await {
            tracing::error!(error = %e, "health check: round trip failed");
            return HealthReport::failed(true, format!("store round trip failed: {e}"));
        }

        match self.inspect().await {
            Ok(report) => {
                if !report.is_healthy() {
                    tracing::warn!(issues = ?report.issues, "health check raised issues");
                }
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "health check: key inspection failed");
                HealthReport::failed(true, format!("key inspection failed: {e}"))
            }
        }
    }

    /// Estimated footprint of the key-space, from a fresh health probe.
    pub async fn memory_usage(&self) -> MemoryEstimate {
        MemoryEstimate::from_report(&self.health_check().await)
    }

    async fn round_trip(&self) -> Result<()> {
        let store = self.ctx.store();
        let key = format!("{HEALTH_PROBE_PREFIX}{}", Uuid::new_v4());
        let value = Utc::now().to_rfc3339();

        store.set_with_ttl(&key, &value, HEALTH_PROBE_TTL).await?;
        let read = store.get(&key).await?;
        store.del(std::slice::from_ref(&key)).await?;

        if read.as_deref() != Some(value.as_str()) {
            return Err(stock_store::StoreError::Unavailable(
                "probe value did not read back".to_string(),
            )
            .into());
        }
        Ok(())
    }

    async fn inspect(&self) -> Result<HealthReport> {
        let config = self.ctx.config();
        let store = self.ctx.store();
        let batch = config.scan_batch_size;
        let now = Utc::now();

        let stock_keys = store.count_keys(&keys::all_stock_pattern(), batch).await?;
        let lock_keys = store.count_keys(&keys::all_locks_pattern(), batch).await?;

        let mut reservation_keys = 0;
        let mut stale_reservations = 0;
        let mut malformed = 0;
        self.ledger
            .for_each_batch(&keys::all_reservations_pattern(), |entries| {
                for scanned in entries {
                    reservation_keys += 1;
                    match scanned.entry {
                        LedgerEntry::Record(record) => {
                            let age = record.age(now).to_std().unwrap_or_default();
                            if record.status == ReservationStatus::Reserved
                                && age > config.stale_reservation_age
                            {
                                stale_reservations += 1;
                            }
                        }
                        LedgerEntry::Malformed { .. } => malformed += 1,
                    }
                }
                Ok(())
            })
            .await?;

        let mut issues = Vec::new();
        if lock_keys > config.lock_warning_threshold {
            issues.push(format!("{lock_keys} locks held"));
        }
        if stale_reservations > config.stale_warning_threshold {
            issues.push(format!("{stale_reservations} stale reservations"));
        }
        if malformed > 0 {
            issues.push(format!("{malformed} malformed reservation records"));
        }

        let status = if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };

        Ok(HealthReport {
            status,
            store: true,
            operations: true,
            stock_keys,
            reservation_keys,
            lock_keys,
            stale_reservations,
            issues,
            checked_at: now,
        })
    }
}

fn sort_newest_first(records: &mut [ReservationRecord]) {
    records.sort_by(|a, b| b.reserved_at.cmp(&a.reserved_at));
}

#[cfg(test)]
mod tests {
    use common::UserId;
    use stock_store::{InMemoryAuthoritativeStore, InMemoryStockStore};

    use super::*;
    use crate::config::StockConfig;

    type TestMonitoring = MonitoringService<InMemoryStockStore, InMemoryAuthoritativeStore>;

    fn service(config: StockConfig) -> (InMemoryStockStore, TestMonitoring) {
        let store = InMemoryStockStore::new();
        let ctx = StockContext::new(store.clone(), InMemoryAuthoritativeStore::new(), config);
        (store, MonitoringService::new(ctx))
    }

    async fn put(store: &InMemoryStockStore, record: &ReservationRecord) {
        store
            .set_with_ttl(&record.key(), &record.to_json().unwrap(), Duration::from_secs(3600))
            .await
            .unwrap();
    }

    fn record(user: &str, product: &str, minutes_ago: i64) -> ReservationRecord {
        ReservationRecord::new(
            ProductId::new(product),
            UserId::new(user),
            2,
            Utc::now() - chrono::Duration::minutes(minutes_ago),
        )
    }

    #[tokio::test]
    async fn test_activity_sorted_newest_first() {
        let (store, monitoring) = service(StockConfig::default());
        put(&store, &record("old", "p1", 30)).await;
        put(&store, &record("new", "p1", 1)).await;
        put(&store, &record("mid", "p1", 10)).await;
        put(&store, &record("other", "p2", 0)).await;
        store.set("reservation:bad:p1", "nope").await.unwrap();

        let activity = monitoring.activity(&ProductId::new("p1")).await.unwrap();
        let users: Vec<_> = activity.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(users, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_product_views_ignore_lookalike_ids() {
        let (store, monitoring) = service(StockConfig::default());
        put(&store, &record("alice", "bundle:p1", 0)).await;
        put(&store, &record("bob", "*", 0)).await;

        let p1 = ProductId::new("p1");
        assert!(monitoring.activity(&p1).await.unwrap().is_empty());
        assert!(!monitoring.has_pending_reservations(&p1).await.unwrap());

        let wildcard = monitoring.activity(&ProductId::new("*")).await.unwrap();
        assert_eq!(wildcard.len(), 1);
        assert_eq!(wildcard[0].user_id.as_str(), "bob");
    }

    #[tokio::test]
    async fn test_all_activity_respects_limit() {
        let (store, monitoring) = service(StockConfig {
            activity_limit: 2,
            ..StockConfig::default()
        });
        for i in 0..5 {
            put(&store, &record(&format!("u{i}"), "p1", i)).await;
        }

        assert_eq!(monitoring.all_activity(None).await.unwrap().len(), 2);
        let three = monitoring.all_activity(Some(3)).await.unwrap();
        assert_eq!(three.len(), 3);
        assert_eq!(three[0].user_id.as_str(), "u0");
    }

    #[tokio::test]
    async fn test_stats_and_pending() {
        let (store, monitoring) = service(StockConfig::default());
        let reserved = record("u1", "p1", 0);
        put(&store, &reserved).await;
        put(&store, &record("u2", "p1", 0).confirm(Utc::now()).unwrap()).await;
        put(&store, &record("u3", "p2", 0).roll_back(Utc::now()).unwrap()).await;

        let stats = monitoring.stats().await.unwrap();
        assert_eq!(
            stats,
            ReservationStats {
                total: 3,
                reserved: 1,
                confirmed: 1,
                rolled_back: 1,
                reserved_quantity: 2,
            }
        );
        assert!(monitoring.has_pending_reservations(&ProductId::new("p1")).await.unwrap());
        assert!(!monitoring.has_pending_reservations(&ProductId::new("p2")).await.unwrap());

        let active = monitoring.active_reservations(10).await.unwrap();
        assert_eq!(active, vec![reserved]);
    }

    #[tokio::test]
    async fn test_health_on_empty_store() {
        let (store, monitoring) = service(StockConfig::default());
        let report = monitoring.health_check().await;

        assert!(report.store);
        assert!(report.operations);
        assert!(report.issues.is_empty());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(store.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_health_warns_on_thresholds() {
        let (store, monitoring) = service(StockConfig {
            lock_warning_threshold: 1,
            stale_warning_threshold: 0,
            ..StockConfig::default()
        });
        store.set("stock_lock:a", "x").await.unwrap();
        store.set("stock_lock:b", "y").await.unwrap();
        put(&store, &record("u1", "p1", 3 * 60)).await;

        let report = monitoring.health_check().await;
        assert_eq!(report.status, HealthStatus::Warning);
        assert_eq!(report.lock_keys, 2);
        assert_eq!(report.stale_reservations, 1);
        assert_eq!(report.issues.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_usage_counts_keys() {
        let (store, monitoring) = service(StockConfig::default());
        store.set("stock:a", "1").await.unwrap();
        store.set("stock:b", "2").await.unwrap();
        put(&store, &record("u1", "a", 0)).await;

        let memory = monitoring.memory_usage().await;
        assert_eq!(memory.stock_keys, 2);
        assert_eq!(memory.reservation_keys, 1);
        assert_eq!(memory.estimated_bytes, 2 * 50 + 200);
    }

    #[tokio::test]
    async fn test_health_reports_outage() {
        let (store, monitoring) = service(StockConfig::default());
        store.set_unavailable(true);

        let report = monitoring.health_check().await;
        assert_eq!(report.status, HealthStatus::Error);
        assert!(!report.store);
        assert!(!report.operations);
        assert_eq!(report.issues.len(), 1);
    }
}
