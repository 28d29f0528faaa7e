//! Worker error types.

use reservation::ReservationError;
use stock_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A store could not be reached or set up.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An engine operation failed.
    #[error("Reservation error: {0}")]
    Reservation(#[from] ReservationError),

    /// The metrics exporter could not be installed.
    #[error("Metrics exporter error: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
