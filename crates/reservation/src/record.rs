//! Reservation records and their lifecycle.

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};
use stock_store::keys;

use crate::error::{ReservationError, Result};

/// The status of a reservation.
///
/// State transitions:
/// ```text
/// Reserved ──┬──► Confirmed
///            └──► RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Stock is held pending the order outcome.
    #[default]
    Reserved,

    /// The order went through (terminal state).
    Confirmed,

    /// The hold was returned to stock (terminal state).
    RolledBack,
}

impl ReservationStatus {
    /// Returns true if the reservation can be confirmed.
    pub fn can_confirm(&self) -> bool {
        matches!(self, ReservationStatus::Reserved)
    }

    /// Returns true if the reservation can be rolled back.
    pub fn can_roll_back(&self) -> bool {
        matches!(self, ReservationStatus::Reserved)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Confirmed | ReservationStatus::RolledBack
        )
    }

    /// Returns the status name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A per-(user, product) hold on stock, as stored in the fast path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRecord {
    pub product_id: ProductId,
    pub user_id: UserId,
    pub quantity: u32,
    pub reserved_at: DateTime<Utc>,
    pub status: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl ReservationRecord {
    /// Creates a fresh `reserved` record.
    pub fn new(product_id: ProductId, user_id: UserId, quantity: u32, now: DateTime<Utc>) -> Self {
        Self {
            product_id,
            user_id,
            quantity,
            reserved_at: now,
            status: ReservationStatus::Reserved,
            confirmed_at: None,
            rolled_back_at: None,
        }
    }

    /// The fast-path key this record lives under.
    pub fn key(&self) -> String {
        keys::reservation_key(&self.user_id, &self.product_id)
    }

    /// Returns a confirmed copy of this record.
    pub fn confirm(&self, at: DateTime<Utc>) -> Result<Self> {
        if !self.status.can_confirm() {
            return Err(self.unsupported(ReservationStatus::Confirmed));
        }
        Ok(Self {
            status: ReservationStatus::Confirmed,
            confirmed_at: Some(at),
            ..self.clone()
        })
    }

    /// Returns a rolled-back copy of this record.
    pub fn roll_back(&self, at: DateTime<Utc>) -> Result<Self> {
        if !self.status.can_roll_back() {
            return Err(self.unsupported(ReservationStatus::RolledBack));
        }
        Ok(Self {
            status: ReservationStatus::RolledBack,
            rolled_back_at: Some(at),
            ..self.clone()
        })
    }

    /// The most recent lifecycle timestamp.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        [self.confirmed_at, self.rolled_back_at]
            .into_iter()
            .flatten()
            .fold(self.reserved_at, std::cmp::max)
    }

    /// Time since the last lifecycle event, clamped at zero.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.last_activity_at()).max(chrono::Duration::zero())
    }

    /// Serializes the record for storage.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ReservationError::MalformedRecord {
            key: self.key(),
            reason: e.to_string(),
        })
    }

    /// Decodes a stored record.
    pub fn from_json(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ReservationError::MalformedRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn unsupported(&self, target: ReservationStatus) -> ReservationError {
        ReservationError::UnsupportedTransition {
            current: self.status,
            target,
        }
    }
}

/// What a confirm or rollback call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The record moved to its new status.
    Applied(ReservationRecord),
    /// No readable record exists for the (user, product) pair.
    NotFound,
    /// The record was left as is because of its current status.
    Unchanged(ReservationStatus),
}

impl TransitionOutcome {
    /// Returns true if the transition was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}
