pub mod authoritative;
pub mod error;
pub mod keys;
pub mod memory;
pub mod postgres;
pub mod redis_store;
pub mod store;

pub use authoritative::{AuthoritativeStore, InMemoryAuthoritativeStore, UpdatePrecondition};
pub use common::{ProductId, UserId};
pub use error::{Result, StoreError};
pub use memory::InMemoryStockStore;
pub use postgres::PostgresAuthoritativeStore;
pub use redis_store::RedisStockStore;
pub use store::{KeyStream, ScanPage, StockStore, StockStoreExt, scan_batches};
