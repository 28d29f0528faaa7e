use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::keys::glob_match;
use crate::store::{ScanPage, StockStore};
use crate::{Result, StoreError};

const DEFAULT_SCAN_COUNT: usize = 10;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory fast-path store for tests and single-process use.
///
/// Mirrors the Redis semantics the engine depends on: per-key atomicity,
/// set-if-absent with expiry, integer counters and cursor scans. Expiry
/// runs on Tokio's clock, so paused-time tests can advance past a TTL.
#[derive(Clone, Default)]
pub struct InMemoryStockStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStockStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every call fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of live keys.
    pub async fn key_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Returns the remaining time-to-live of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Clears all keys.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn apply_delta(&self, key: &str, delta: i64) -> Result<i64> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let (current, expires_at) = match entries.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                let value =
                    entry
                        .value
                        .parse::<i64>()
                        .map_err(|_| StoreError::NotAnInteger {
                            key: key.to_string(),
                        })?;
                (value, entry.expires_at)
            }
            None => (0, None),
        };

        let updated = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: updated.to_string(),
                expires_at,
            },
        );
        Ok(updated)
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.check_available()?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|k| {
                entries
                    .get(k)
                    .filter(|e| e.is_live(now))
                    .map(|e| e.value.clone())
            })
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_many(&self, pairs: &[(String, String)]) -> Result<()> {
        self.check_available()?;
        let mut entries = self.entries.write().await;
        for (key, value) in pairs {
            entries.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at: None,
                },
            );
        }
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.apply_delta(key, delta).await
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.apply_delta(key, -delta).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key)
                && entry.is_live(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && e.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        self.check_available()?;
        let now = Instant::now();
        let count = if count == 0 { DEFAULT_SCAN_COUNT } else { count };

        let mut live: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, e)| e.is_live(now))
                .map(|(k, _)| k.clone())
                .collect()
        };
        live.sort();

        // Like Redis, a page walks `count` slots of the key-space and only
        // then applies MATCH, so a page can be empty mid-scan.
        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(live.len());
        let end = start.saturating_add(count).min(live.len());
        let keys = live[start..end]
            .iter()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        let next = if end >= live.len() { 0 } else { end as u64 };

        Ok(ScanPage { cursor: next, keys })
    }
}
