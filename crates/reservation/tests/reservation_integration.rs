//! End-to-end reservation flows against the in-memory stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reservation::{
    AdminActor, HealthStatus, ProductId, ReservationError, ReservationOutcome, ReservationPath,
    ReservationRecord, ReservationStatus, StockConfig, StockContext, StockEngine,
    TransitionOutcome, UserId,
};
use stock_store::{
    InMemoryAuthoritativeStore, InMemoryStockStore, ScanPage, StockStore, StoreError,
};

type Engine = StockEngine<InMemoryStockStore, InMemoryAuthoritativeStore>;

fn setup(products: &[(&str, i64)]) -> (InMemoryStockStore, InMemoryAuthoritativeStore, Engine) {
    setup_with(products, StockConfig::default())
}

fn setup_with(
    products: &[(&str, i64)],
    config: StockConfig,
) -> (InMemoryStockStore, InMemoryAuthoritativeStore, Engine) {
    let store = InMemoryStockStore::new();
    let authoritative = InMemoryAuthoritativeStore::with_products(products.iter().copied());
    let ctx = StockContext::new(store.clone(), authoritative.clone(), config);
    (store, authoritative, StockEngine::new(ctx))
}

fn p(id: &str) -> ProductId {
    ProductId::new(id)
}

fn u(id: &str) -> UserId {
    UserId::new(id)
}

async fn stock(engine: &Engine, product: &str) -> i64 {
    engine.current_stock(&p(product)).await.unwrap()
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn single_unit_race_has_exactly_one_winner() {
    let (_, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 1).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .reserve(&p("p1"), &u(&format!("user-{i}")), 1)
                .await
                .unwrap()
        }));
    }

    let mut reserved = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        match outcome {
            ReservationOutcome::Reserved {
                remaining_stock, ..
            } => {
                assert_eq!(remaining_stock, 0);
                reserved += 1;
            }
            ReservationOutcome::Contended { .. }
            | ReservationOutcome::InsufficientStock { .. } => {}
        }
    }

    assert_eq!(reserved, 1);
    assert_eq!(stock(&engine, "p1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn retrying_buyers_never_oversell() {
    let (_, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 10).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..40 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let outcome = engine
                    .reserve(&p("p1"), &u(&format!("user-{i}")), 1)
                    .await
                    .unwrap();
                match outcome {
                    ReservationOutcome::Contended { .. } => tokio::task::yield_now().await,
                    other => return other,
                }
            }
        }));
    }

    let mut reserved = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        if let Some(remaining) = outcome.remaining_stock() {
            assert!(remaining >= 0);
            reserved += 1;
        }
    }

    assert_eq!(reserved, 10);
    assert_eq!(stock(&engine, "p1").await, 0);
    assert_eq!(engine.monitoring().stats().await.unwrap().reserved, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn lock_admits_one_holder_at_a_time() {
    let (_, _, engine) = setup(&[]);
    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        let holders = Arc::clone(&holders);
        let max_seen = Arc::clone(&max_seen);
        let entered = Arc::clone(&entered);
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                let owner = format!("worker-{i}");
                if let Some(guard) = engine.lock().try_acquire(&p("p1"), &owner).await.unwrap() {
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    entered.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    guard.release().await;
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(entered.load(Ordering::SeqCst) > 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_lock_blocks_until_ttl() {
    let (store, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 3).await.unwrap();
    assert!(
        engine
            .lock()
            .acquire(&p("p1"), "crashed-worker", Duration::from_secs(5))
            .await
            .unwrap()
    );

    let blocked = engine.reserve(&p("p1"), &u("u1"), 1).await.unwrap();
    assert!(matches!(blocked, ReservationOutcome::Contended { .. }));

    tokio::time::advance(Duration::from_secs(6)).await;
    let outcome = engine.reserve(&p("p1"), &u("u1"), 1).await.unwrap();
    assert_eq!(outcome.remaining_stock(), Some(2));
    assert!(!store.exists("stock_lock:p1").await.unwrap());
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn scenario_two_users_one_unit() {
    let (_, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 1).await.unwrap();

    let a = engine.reserve(&p("p1"), &u("a"), 1).await.unwrap();
    let b = engine.reserve(&p("p1"), &u("b"), 1).await.unwrap();

    assert_eq!(a.remaining_stock(), Some(0));
    match b.into_result() {
        Err(ReservationError::InsufficientStock {
            product_id,
            available,
            requested,
        }) => {
            assert_eq!(product_id, p("p1"));
            assert_eq!(available, 0);
            assert_eq!(requested, 1);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn scenario_reserve_then_rollback_restores_stock() {
    let (_, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 10).await.unwrap();

    engine.reserve(&p("p1"), &u("u1"), 3).await.unwrap();
    assert_eq!(stock(&engine, "p1").await, 7);

    let outcome = engine.rollback(&u("u1"), &p("p1")).await.unwrap();
    match outcome {
        TransitionOutcome::Applied(record) => {
            assert_eq!(record.status, ReservationStatus::RolledBack);
            assert!(record.rolled_back_at.is_some());
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(stock(&engine, "p1").await, 10);
}

#[tokio::test]
async fn scenario_cold_start_hydrates_from_authoritative() {
    let (_, _, enough) = setup(&[("p1", 5)]);
    let outcome = enough.reserve(&p("p1"), &u("u1"), 2).await.unwrap();
    assert_eq!(outcome.remaining_stock(), Some(3));
    assert_eq!(stock(&enough, "p1").await, 3);

    let (_, _, short) = setup(&[("p1", 1)]);
    let outcome = short.reserve(&p("p1"), &u("u1"), 2).await.unwrap();
    assert!(matches!(
        outcome,
        ReservationOutcome::InsufficientStock { available: 1, .. }
    ));
    assert_eq!(stock(&short, "p1").await, 1);
}

#[tokio::test]
async fn scenario_duplicate_reservation_last_write_wins() {
    let (_, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 5).await.unwrap();

    engine.reserve(&p("p1"), &u("u1"), 2).await.unwrap();
    engine.reserve(&p("p1"), &u("u1"), 2).await.unwrap();
    assert_eq!(stock(&engine, "p1").await, 1);

    engine.rollback(&u("u1"), &p("p1")).await.unwrap();
    // The first hold was overwritten, so only the second is returned.
    assert_eq!(stock(&engine, "p1").await, 3);
}

#[tokio::test]
async fn scenario_health_on_empty_store() {
    let (_, _, engine) = setup(&[]);
    let report = engine.monitoring().health_check().await;

    assert!(report.store);
    assert!(report.operations);
    assert!(report.issues.is_empty());
    assert_eq!(report.status, HealthStatus::Healthy);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn rollback_is_idempotent() {
    let (_, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 4).await.unwrap();
    engine.reserve(&p("p1"), &u("u1"), 4).await.unwrap();

    assert!(engine.rollback(&u("u1"), &p("p1")).await.unwrap().is_applied());
    assert_eq!(
        engine.rollback(&u("u1"), &p("p1")).await.unwrap(),
        TransitionOutcome::Unchanged(ReservationStatus::RolledBack)
    );
    assert_eq!(stock(&engine, "p1").await, 4);
}

#[tokio::test]
async fn confirm_is_stock_neutral_and_blocks_rollback() {
    let (store, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 4).await.unwrap();
    engine.reserve(&p("p1"), &u("u1"), 3).await.unwrap();

    let outcome = engine.confirm(&u("u1"), &p("p1")).await.unwrap();
    assert!(outcome.is_applied());
    assert_eq!(stock(&engine, "p1").await, 1);
    let ttl = store.ttl("reservation:u1:p1").await.unwrap();
    assert!(ttl > Duration::from_secs(60 * 60));

    assert_eq!(
        engine.confirm(&u("u1"), &p("p1")).await.unwrap(),
        TransitionOutcome::Unchanged(ReservationStatus::Confirmed)
    );
    assert_eq!(
        engine.rollback(&u("u1"), &p("p1")).await.unwrap(),
        TransitionOutcome::Unchanged(ReservationStatus::Confirmed)
    );
    assert_eq!(stock(&engine, "p1").await, 1);
}

#[tokio::test]
async fn rolled_back_reservation_cannot_be_confirmed() {
    let (_, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 2).await.unwrap();
    engine.reserve(&p("p1"), &u("u1"), 1).await.unwrap();
    engine.rollback(&u("u1"), &p("p1")).await.unwrap();

    assert_eq!(
        engine.confirm(&u("u1"), &p("p1")).await.unwrap(),
        TransitionOutcome::Unchanged(ReservationStatus::RolledBack)
    );
}

#[tokio::test]
async fn missing_and_malformed_records_are_no_ops() {
    let (store, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 2).await.unwrap();

    assert_eq!(
        engine.confirm(&u("u1"), &p("p1")).await.unwrap(),
        TransitionOutcome::NotFound
    );

    store.set("reservation:u1:p1", "{\"broken\":").await.unwrap();
    assert_eq!(
        engine.rollback(&u("u1"), &p("p1")).await.unwrap(),
        TransitionOutcome::NotFound
    );
    assert_eq!(stock(&engine, "p1").await, 2);
}

// ============================================================================
// Failure handling
// ============================================================================

/// Delegates to an in-memory store but refuses to write reservation records.
#[derive(Clone)]
struct RecordWriteFailure {
    inner: InMemoryStockStore,
}

#[async_trait]
impl StockStore for RecordWriteFailure {
    async fn ping(&self) -> stock_store::Result<()> {
        self.inner.ping().await
    }
    async fn get(&self, key: &str) -> stock_store::Result<Option<String>> {
        self.inner.get(key).await
    }
    async fn mget(&self, keys: &[String]) -> stock_store::Result<Vec<Option<String>>> {
        self.inner.mget(keys).await
    }
    async fn set(&self, key: &str, value: &str) -> stock_store::Result<()> {
        self.inner.set(key, value).await
    }
    async fn set_many(&self, pairs: &[(String, String)]) -> stock_store::Result<()> {
        self.inner.set_many(pairs).await
    }
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> stock_store::Result<()> {
        if key.starts_with("reservation:") {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        self.inner.set_with_ttl(key, value, ttl).await
    }
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> stock_store::Result<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }
    async fn incr_by(&self, key: &str, delta: i64) -> stock_store::Result<i64> {
        self.inner.incr_by(key, delta).await
    }
    async fn decr_by(&self, key: &str, delta: i64) -> stock_store::Result<i64> {
        self.inner.decr_by(key, delta).await
    }
    async fn del(&self, keys: &[String]) -> stock_store::Result<u64> {
        self.inner.del(keys).await
    }
    async fn delete_if_equals(&self, key: &str, expected: &str) -> stock_store::Result<bool> {
        self.inner.delete_if_equals(key, expected).await
    }
    async fn exists(&self, key: &str) -> stock_store::Result<bool> {
        self.inner.exists(key).await
    }
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> stock_store::Result<ScanPage> {
        self.inner.scan(cursor, pattern, count).await
    }
}

#[tokio::test]
async fn failed_record_write_restores_stock() {
    let inner = InMemoryStockStore::new();
    inner.set("stock:p1", "5").await.unwrap();
    let ctx = StockContext::new(
        RecordWriteFailure {
            inner: inner.clone(),
        },
        InMemoryAuthoritativeStore::new(),
        StockConfig::default(),
    );
    let engine = StockEngine::new(ctx);

    let result = engine.reserve(&p("p1"), &u("u1"), 2).await;
    assert!(matches!(result, Err(ReservationError::StoreUnavailable(_))));
    assert_eq!(inner.get("stock:p1").await.unwrap().as_deref(), Some("5"));
    assert!(!inner.exists("stock_lock:p1").await.unwrap());
}

#[tokio::test]
async fn fallback_reserves_against_authoritative_when_store_down() {
    let (store, authoritative, engine) = setup(&[("p1", 5)]);
    store.set_unavailable(true);

    let outcome = engine.reserve_or_fallback(&p("p1"), &u("u1"), 2).await.unwrap();
    assert_eq!(
        outcome,
        ReservationOutcome::Reserved {
            product_id: p("p1"),
            remaining_stock: 3,
            path: ReservationPath::Fallback,
        }
    );
    assert_eq!(authoritative.quantity(&p("p1")).await, Some(3));

    let short = engine.reserve_or_fallback(&p("p1"), &u("u2"), 9).await.unwrap();
    assert!(matches!(
        short,
        ReservationOutcome::InsufficientStock { available: 3, .. }
    ));
}

#[tokio::test]
async fn fallback_not_used_when_fast_path_answers() {
    let (_, authoritative, engine) = setup(&[("p1", 5)]);
    engine.sync().set_level(&p("p1"), 1).await.unwrap();

    let outcome = engine.reserve_or_fallback(&p("p1"), &u("u1"), 2).await.unwrap();
    assert!(matches!(
        outcome,
        ReservationOutcome::InsufficientStock { available: 1, .. }
    ));
    assert_eq!(authoritative.quantity(&p("p1")).await, Some(5));
}

#[tokio::test]
async fn fallback_fails_when_both_stores_down() {
    let (store, authoritative, engine) = setup(&[("p1", 5)]);
    store.set_unavailable(true);
    authoritative.set_unavailable(true);

    assert!(matches!(
        engine.reserve_or_fallback(&p("p1"), &u("u1"), 1).await,
        Err(ReservationError::StoreUnavailable(_))
    ));
}

// ============================================================================
// Maintenance and reporting
// ============================================================================

#[tokio::test]
async fn sweep_removes_only_old_records() {
    let (store, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 5).await.unwrap();
    engine.reserve(&p("p1"), &u("fresh"), 1).await.unwrap();

    let old = ReservationRecord::new(
        p("p1"),
        u("old"),
        1,
        Utc::now() - chrono::Duration::hours(25),
    )
    .confirm(Utc::now() - chrono::Duration::hours(24) - chrono::Duration::minutes(30))
    .unwrap();
    store
        .set_with_ttl(&old.key(), &old.to_json().unwrap(), Duration::from_secs(60))
        .await
        .unwrap();

    let report = engine.maintenance().sweep_expired().await.unwrap();
    assert_eq!(report.expired, 1);
    assert!(store.exists("reservation:fresh:p1").await.unwrap());
    assert!(!store.exists("reservation:old:p1").await.unwrap());
}

/// Lets another engine reserve the same (user, product) pair right before
/// the first reservation delete goes through.
struct ReserveBeforeDelete {
    inner: InMemoryStockStore,
    racer: Engine,
    fired: AtomicBool,
}

#[async_trait]
impl StockStore for ReserveBeforeDelete {
    async fn ping(&self) -> stock_store::Result<()> {
        self.inner.ping().await
    }
    async fn get(&self, key: &str) -> stock_store::Result<Option<String>> {
        self.inner.get(key).await
    }
    async fn mget(&self, keys: &[String]) -> stock_store::Result<Vec<Option<String>>> {
        self.inner.mget(keys).await
    }
    async fn set(&self, key: &str, value: &str) -> stock_store::Result<()> {
        self.inner.set(key, value).await
    }
    async fn set_many(&self, pairs: &[(String, String)]) -> stock_store::Result<()> {
        self.inner.set_many(pairs).await
    }
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> stock_store::Result<()> {
        self.inner.set_with_ttl(key, value, ttl).await
    }
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> stock_store::Result<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }
    async fn incr_by(&self, key: &str, delta: i64) -> stock_store::Result<i64> {
        self.inner.incr_by(key, delta).await
    }
    async fn decr_by(&self, key: &str, delta: i64) -> stock_store::Result<i64> {
        self.inner.decr_by(key, delta).await
    }
    async fn del(&self, keys: &[String]) -> stock_store::Result<u64> {
        self.inner.del(keys).await
    }
    async fn delete_if_equals(&self, key: &str, expected: &str) -> stock_store::Result<bool> {
        if key.starts_with("reservation:") && !self.fired.swap(true, Ordering::SeqCst) {
            let outcome = self
                .racer
                .reserve(&p("p1"), &u("u1"), 1)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            assert!(outcome.is_reserved());
        }
        self.inner.delete_if_equals(key, expected).await
    }
    async fn exists(&self, key: &str) -> stock_store::Result<bool> {
        self.inner.exists(key).await
    }
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> stock_store::Result<ScanPage> {
        self.inner.scan(cursor, pattern, count).await
    }
}

#[tokio::test]
async fn sweep_keeps_reservation_written_after_scan() {
    let inner = InMemoryStockStore::new();
    let authoritative = InMemoryAuthoritativeStore::new();
    let racer = StockEngine::new(StockContext::new(
        inner.clone(),
        authoritative.clone(),
        StockConfig::default(),
    ));
    racer.sync().set_level(&p("p1"), 5).await.unwrap();

    let old = ReservationRecord::new(
        p("p1"),
        u("u1"),
        1,
        Utc::now() - chrono::Duration::hours(30),
    )
    .roll_back(Utc::now() - chrono::Duration::hours(29))
    .unwrap();
    inner
        .set_with_ttl(&old.key(), &old.to_json().unwrap(), Duration::from_secs(60))
        .await
        .unwrap();

    let sweeper = StockEngine::new(StockContext::new(
        ReserveBeforeDelete {
            inner: inner.clone(),
            racer: racer.clone(),
            fired: AtomicBool::new(false),
        },
        authoritative,
        StockConfig::default(),
    ));

    let report = sweeper.maintenance().sweep_expired().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.expired, 0);
    assert_eq!(report.superseded, 1);
    assert_eq!(inner.get("stock:p1").await.unwrap().as_deref(), Some("4"));

    let rolled_back = racer.rollback(&u("u1"), &p("p1")).await.unwrap();
    assert!(rolled_back.is_applied());
    assert_eq!(inner.get("stock:p1").await.unwrap().as_deref(), Some("5"));
}

#[tokio::test]
async fn reset_all_with_permission() {
    let (store, _, engine) = setup_with(
        &[],
        StockConfig {
            allow_reset: true,
            ..StockConfig::default()
        },
    );
    engine.sync().set_level(&p("p1"), 5).await.unwrap();
    engine.reserve(&p("p1"), &u("u1"), 1).await.unwrap();

    let removed = engine
        .maintenance()
        .reset_all(&AdminActor::new("ops"))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.key_count().await, 0);
}

#[tokio::test]
async fn product_report_summarizes_activity() {
    let (_, _, engine) = setup(&[]);
    engine.sync().set_level(&p("p1"), 50).await.unwrap();
    for i in 0..12 {
        engine
            .reserve(&p("p1"), &u(&format!("u{i:02}")), 1)
            .await
            .unwrap();
    }
    engine.confirm(&u("u00"), &p("p1")).await.unwrap();

    let report = engine.product_report(&p("p1")).await.unwrap();
    assert_eq!(report.current_stock, 38);
    assert!(report.has_pending_reservations);
    assert_eq!(report.total_reservations, 12);
    assert_eq!(report.recent_activity.len(), 10);
    assert!(
        report
            .recent_activity
            .windows(2)
            .all(|w| w[0].reserved_at >= w[1].reserved_at)
    );
}

#[tokio::test]
async fn dashboard_gathers_levels_stats_and_health() {
    let (_, _, engine) = setup(&[("a", 4), ("b", 2)]);
    engine.sync().warmup().await.unwrap();
    engine.reserve(&p("a"), &u("u1"), 3).await.unwrap();
    engine.reserve(&p("b"), &u("u2"), 1).await.unwrap();
    engine.confirm(&u("u2"), &p("b")).await.unwrap();

    let dashboard = engine.dashboard().await.unwrap();
    assert_eq!(dashboard.stock_levels[&p("a")], 1);
    assert_eq!(dashboard.stock_levels[&p("b")], 1);
    assert_eq!(dashboard.stats.reserved, 1);
    assert_eq!(dashboard.stats.confirmed, 1);
    assert_eq!(dashboard.health.status, HealthStatus::Healthy);
    assert_eq!(dashboard.memory.stock_keys, 2);
    assert_eq!(dashboard.memory.reservation_keys, 2);
}

#[tokio::test]
async fn dashboard_fails_when_store_down() {
    let (store, _, engine) = setup(&[("a", 1)]);
    store.set_unavailable(true);
    assert!(matches!(
        engine.dashboard().await,
        Err(ReservationError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn warmup_then_multiple_stock() {
    let (_, _, engine) = setup(&[("a", 3), ("b", 0)]);
    assert_eq!(engine.sync().warmup().await.unwrap(), 2);

    let levels = engine
        .multiple_stock(&[p("a"), p("b"), p("c")])
        .await
        .unwrap();
    assert_eq!(levels[&p("a")], 3);
    assert_eq!(levels[&p("b")], 0);
    assert_eq!(levels[&p("c")], 0);
}
