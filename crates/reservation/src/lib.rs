//! Distributed stock reservation.
//!
//! Holds stock for users on a fast-path store (Redis) in front of an
//! authoritative store (PostgreSQL). A reservation follows one path:
//!
//! 1. Claim the per-product lock
//! 2. Read the counter, hydrating it from the authoritative store on a miss
//! 3. Check availability and decrement
//! 4. Record the reservation with a TTL
//! 5. Release the lock
//!
//! Reservations end in `confirmed` or `rolled_back`; abandoned ones expire
//! or are swept. When the fast path is down, [`StockEngine::reserve_or_fallback`]
//! reserves directly against the authoritative store.

pub mod config;
pub mod confirmation;
pub mod context;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod ledger;
pub mod lock;
pub mod maintenance;
pub mod monitoring;
pub mod record;
pub mod reservation;
pub mod rollback;
pub mod sync;

pub use common::{AdminActor, ProductId, UserId};
pub use config::StockConfig;
pub use confirmation::ConfirmationService;
pub use context::StockContext;
pub use engine::{ProductStockReport, StockDashboard, StockEngine};
pub use error::{ReservationError, Result};
pub use fallback::FallbackReservationService;
pub use ledger::{LedgerEntry, ReservationLedger, ReservationScope, ScannedEntry};
pub use lock::{DistributedLock, LockGuard};
pub use maintenance::{MaintenanceService, SweepReport};
pub use monitoring::{
    HealthReport, HealthStatus, MemoryEstimate, MonitoringService, ReservationStats,
};
pub use record::{ReservationRecord, ReservationStatus, TransitionOutcome};
pub use reservation::{ReservationOutcome, ReservationPath, StockReservationService};
pub use rollback::RollbackService;
pub use sync::SynchronizationService;
