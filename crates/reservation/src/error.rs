//! Reservation error types.

use common::ProductId;
use stock_store::StoreError;
use thiserror::Error;

use crate::record::ReservationStatus;

/// Errors that can occur during reservation operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// Another request holds the product lock. Retryable; nothing was mutated.
    #[error("Product {product_id} is being reserved by another request, try again")]
    Contention { product_id: ProductId },

    /// Not enough stock to satisfy the request.
    #[error("Insufficient stock for {product_id}. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: u32,
    },

    /// The fast-path or authoritative store could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A reservation record could not be decoded.
    #[error("Malformed reservation record at '{key}': {reason}")]
    MalformedRecord { key: String, reason: String },

    /// Quantities and stock levels must be positive (levels may be zero).
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// The reservation is not in a state that allows the transition.
    #[error("Cannot move reservation from {current} to {target}")]
    UnsupportedTransition {
        current: ReservationStatus,
        target: ReservationStatus,
    },

    /// A privileged operation was refused.
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl ReservationError {
    /// Returns true if the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReservationError::Contention { .. })
    }
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;
