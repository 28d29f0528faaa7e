//! Shared identifier types for the stock-reservation engine.

mod types;

pub use types::{AdminActor, ProductId, UserId};
