//! Engine tuning knobs.

use std::time::Duration;

/// Timing and threshold settings shared by every service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockConfig {
    /// How long a product lock lives if never released.
    pub lock_ttl: Duration,
    /// Lifetime of a fresh `reserved` record.
    pub reservation_ttl: Duration,
    /// Lifetime of a `confirmed` record, kept for audit.
    pub confirmed_ttl: Duration,
    /// Lifetime of a `rolled_back` record.
    pub rolled_back_ttl: Duration,
    /// Records older than this are removed by the sweep, whatever their status.
    pub sweep_max_age: Duration,
    /// Reservations older than this count as stale in health reports.
    pub stale_reservation_age: Duration,
    /// Health turns to warning when more locks than this are held.
    pub lock_warning_threshold: usize,
    /// Health turns to warning when more stale reservations than this exist.
    pub stale_warning_threshold: usize,
    /// `COUNT` hint for every keyspace scan.
    pub scan_batch_size: usize,
    /// Default cap for cross-product activity listings.
    pub activity_limit: usize,
    /// Whether `reset_all` may run at all.
    pub allow_reset: bool,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(5),
            reservation_ttl: Duration::from_secs(60 * 60),
            confirmed_ttl: Duration::from_secs(24 * 60 * 60),
            rolled_back_ttl: Duration::from_secs(60 * 60),
            sweep_max_age: Duration::from_secs(24 * 60 * 60),
            stale_reservation_age: Duration::from_secs(2 * 60 * 60),
            lock_warning_threshold: 10,
            stale_warning_threshold: 100,
            scan_batch_size: 100,
            activity_limit: 100,
            allow_reset: false,
        }
    }
}

impl StockConfig {
    /// Loads configuration from `STOCK_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            parse(&lookup, key).map(Duration::from_millis).unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            parse(&lookup, key).map(Duration::from_secs).unwrap_or(default)
        };

        Self {
            lock_ttl: millis("STOCK_LOCK_TTL_MS", defaults.lock_ttl),
            reservation_ttl: secs("STOCK_RESERVATION_TTL_SECS", defaults.reservation_ttl),
            confirmed_ttl: secs("STOCK_CONFIRMED_TTL_SECS", defaults.confirmed_ttl),
            rolled_back_ttl: secs("STOCK_ROLLED_BACK_TTL_SECS", defaults.rolled_back_ttl),
            sweep_max_age: secs("STOCK_SWEEP_MAX_AGE_SECS", defaults.sweep_max_age),
            stale_reservation_age: secs("STOCK_STALE_AGE_SECS", defaults.stale_reservation_age),
            lock_warning_threshold: parse(&lookup, "STOCK_LOCK_WARNING_THRESHOLD")
                .unwrap_or(defaults.lock_warning_threshold),
            stale_warning_threshold: parse(&lookup, "STOCK_STALE_WARNING_THRESHOLD")
                .unwrap_or(defaults.stale_warning_threshold),
            scan_batch_size: parse(&lookup, "STOCK_SCAN_BATCH_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.scan_batch_size),
            activity_limit: parse(&lookup, "STOCK_ACTIVITY_LIMIT")
                .unwrap_or(defaults.activity_limit),
            allow_reset: parse(&lookup, "STOCK_ALLOW_RESET").unwrap_or(defaults.allow_reset),
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
