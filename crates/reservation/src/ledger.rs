//! Storage of reservation records in the fast-path store.

use std::sync::Arc;
use std::time::Duration;

use common::{ProductId, UserId};
use futures_util::TryStreamExt;
use stock_store::{AuthoritativeStore, StockStore, keys, scan_batches};

use crate::context::StockContext;
use crate::error::{ReservationError, Result};
use crate::record::ReservationRecord;

/// One key seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    Record(ReservationRecord),
    Malformed { key: String, reason: String },
}

/// A scanned key with the raw value it held when read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    pub key: String,
    pub raw: String,
    pub entry: LedgerEntry,
}

/// Which reservations a targeted scan is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationScope<'a> {
    Product(&'a ProductId),
    User(&'a UserId),
}

impl ReservationScope<'_> {
    pub fn pattern(&self) -> String {
        match self {
            Self::Product(product_id) => keys::product_reservations_pattern(product_id),
            Self::User(user_id) => keys::user_reservations_pattern(user_id),
        }
    }

    /// The scan pattern can over-match ids containing `:`; only records
    /// whose own ids agree are in scope.
    pub fn includes(&self, record: &ReservationRecord) -> bool {
        match self {
            Self::Product(product_id) => record.product_id == **product_id,
            Self::User(user_id) => record.user_id == **user_id,
        }
    }
}

/// Reads and writes `reservation:{user}:{product}` records.
pub struct ReservationLedger<S, A> {
    ctx: Arc<StockContext<S, A>>,
}

impl<S, A> Clone for ReservationLedger<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<S, A> ReservationLedger<S, A>
where
    S: StockStore,
    A: AuthoritativeStore,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        Self { ctx }
    }

    /// Loads the record for a (user, product) pair.
    ///
    /// A record that cannot be decoded is reported as absent.
    pub async fn load(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Option<ReservationRecord>> {
        let key = keys::reservation_key(user_id, product_id);
        let Some(raw) = self.ctx.store().get(&key).await? else {
            return Ok(None);
        };

        match ReservationRecord::from_json(&key, &raw) {
            Ok(record) => Ok(Some(record)),
            Err(ReservationError::MalformedRecord { key, reason }) => {
                tracing::warn!(%key, %reason, "ignoring malformed reservation record");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Writes a record, replacing whatever was stored for its pair.
    pub async fn save(&self, record: &ReservationRecord, ttl: Duration) -> Result<()> {
        let json = record.to_json()?;
        self.ctx
            .store()
            .set_with_ttl(&record.key(), &json, ttl)
            .await?;
        Ok(())
    }

    /// Scans every entry matching `pattern`, one batch at a time.
    ///
    /// `visit` is called once per batch with the decoded entries. Keys that
    /// expired between the scan and the read are skipped.
    pub async fn for_each_batch<F>(&self, pattern: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(Vec<ScannedEntry>) -> Result<()>,
    {
        let store = self.ctx.store();
        let mut batches = scan_batches(store, pattern, self.ctx.config().scan_batch_size);

        while let Some(batch) = batches.try_next().await? {
            let values = store.mget(&batch).await?;
            let entries = batch
                .into_iter()
                .zip(values)
                .filter_map(|(key, raw)| {
                    let raw = raw?;
                    let entry = match ReservationRecord::from_json(&key, &raw) {
                        Ok(record) => LedgerEntry::Record(record),
                        Err(e) => LedgerEntry::Malformed {
                            key: key.clone(),
                            reason: e.to_string(),
                        },
                    };
                    Some(ScannedEntry { key, raw, entry })
                })
                .collect();
            visit(entries)?;
        }
        Ok(())
    }

    /// Collects every readable record matching `pattern`.
    ///
    /// Malformed entries are skipped with a warning.
    pub async fn records_matching(&self, pattern: &str) -> Result<Vec<ReservationRecord>> {
        let mut records = Vec::new();
        self.for_each_batch(pattern, |entries| {
            for scanned in entries {
                match scanned.entry {
                    LedgerEntry::Record(record) => records.push(record),
                    LedgerEntry::Malformed { key, reason } => {
                        tracing::warn!(%key, %reason, "skipping malformed reservation record");
                    }
                }
            }
            Ok(())
        })
        .await?;
        Ok(records)
    }

    /// Collects the readable records of one product or user.
    pub async fn records_in(&self, scope: ReservationScope<'_>) -> Result<Vec<ReservationRecord>> {
        let mut records = self.records_matching(&scope.pattern()).await?;
        records.retain(|record| scope.includes(record));
        Ok(records)
    }
}
