//! Redis-backed fast-path store.
//!
//! Every trait method maps onto one Redis command (or one pipeline for the
//! batch writes), so the per-key atomicity the engine relies on is Redis'
//! own:
//!
//! - `set_if_absent` → `SET key value NX PX ttl`
//! - `incr_by` / `decr_by` → `INCRBY` / `DECRBY`
//! - `scan` → `SCAN cursor MATCH pattern COUNT n`
//! - `delete_if_equals` → a Lua compare-and-delete, evaluated atomically

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::Result;
use crate::store::{ScanPage, StockStore};

/// Redis fast-path store with connection pooling via `ConnectionManager`.
#[derive(Clone)]
pub struct RedisStockStore {
    conn_manager: ConnectionManager,
}

impl RedisStockStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        tracing::info!("connected to fast-path store");
        Ok(Self { conn_manager })
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl StockStore for RedisStockStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn_manager.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.set(key, value).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        let value: i64 = conn.decr(key, delta).await?;
        Ok(value)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn_manager.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn_manager.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { cursor: next, keys })
    }
}
