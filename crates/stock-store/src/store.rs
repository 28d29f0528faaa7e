use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::{TryStreamExt, stream};

use crate::{Result, StoreError};

/// One page of a cursor-based key scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Cursor to pass to the next call; `0` means the scan is complete.
    pub cursor: u64,
    /// Keys returned by this page (may be empty even when the scan continues).
    pub keys: Vec<String>,
}

/// A stream of key batches produced by an incremental scan.
pub type KeyStream<'a> = Pin<Box<dyn Stream<Item = Result<Vec<String>>> + Send + 'a>>;

/// Core trait for the fast-path key-value store.
///
/// Every method is a single round trip and atomic on its own key.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Round-trip liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Reads a raw value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Reads many raw values in one round trip, in key order.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Unconditionally writes a value with no expiry.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Writes many values in one pipelined round trip.
    async fn set_many(&self, entries: &[(String, String)]) -> Result<()>;

    /// Writes a value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Writes a value only if the key is absent, expiring after `ttl`.
    ///
    /// Returns `true` if the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Atomically adds `delta` to an integer key (absent counts as 0).
    ///
    /// Returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Atomically subtracts `delta` from an integer key (absent counts as 0).
    ///
    /// Returns the new value.
    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Deletes a key only if it currently holds `expected`.
    ///
    /// Returns `true` if the key was deleted. The compare and the delete are
    /// one atomic step.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// Returns true if the key exists and has not expired.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Returns one page of keys matching a glob pattern.
    ///
    /// Start with cursor `0`; the scan is finished when the returned cursor
    /// is `0` again. Never blocks the store the way a full key listing would.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;
}

/// Extension trait providing convenience methods for stock stores.
#[async_trait]
pub trait StockStoreExt: StockStore {
    /// Reads an integer counter.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key).await? {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Collects every key matching `pattern` by driving the scan to completion.
    async fn collect_keys(&self, pattern: &str, batch_size: usize) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let page = self.scan(cursor, pattern, batch_size).await?;
            keys.extend(page.keys);
            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Counts keys matching `pattern`.
    async fn count_keys(&self, pattern: &str, batch_size: usize) -> Result<usize> {
        Ok(self.collect_keys(pattern, batch_size).await?.len())
    }
}

// Blanket implementation for all StockStore implementations
impl<T: StockStore + ?Sized> StockStoreExt for T {}

/// Streams non-empty key batches matching `pattern`, one scan page at a time.
///
/// Lets callers process a large key-space incrementally instead of
/// materializing every key first.
pub fn scan_batches<'a, S>(store: &'a S, pattern: &'a str, batch_size: usize) -> KeyStream<'a>
where
    S: StockStore + ?Sized,
{
    let pages = stream::try_unfold(Some(0u64), move |cursor| async move {
        let Some(cursor) = cursor else {
            return Ok::<_, StoreError>(None);
        };
        let page = store.scan(cursor, pattern, batch_size).await?;
        let next = (page.cursor != 0).then_some(page.cursor);
        Ok(Some((page.keys, next)))
    });

    Box::pin(pages.try_filter(|keys| std::future::ready(!keys.is_empty())))
}
