//! Per-product distributed lock on top of the fast-path store.
//!
//! A claim is a single `set-if-absent` with expiry on `stock_lock:{product}`.
//! Acquisition never waits: a held lock is reported straight back to the
//! caller. The TTL is the only liveness guarantee.

use std::sync::Arc;
use std::time::Duration;

use common::{AdminActor, ProductId};
use stock_store::{AuthoritativeStore, StockStore, keys};
use uuid::Uuid;

use crate::context::StockContext;
use crate::error::Result;

/// Short-lived mutual exclusion per product.
pub struct DistributedLock<S, A> {
    ctx: Arc<StockContext<S, A>>,
}

impl<S, A> Clone for DistributedLock<S, A> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<S, A> DistributedLock<S, A>
where
    S: StockStore + 'static,
    A: AuthoritativeStore + 'static,
{
    pub fn new(ctx: Arc<StockContext<S, A>>) -> Self {
        Self { ctx }
    }

    /// Claims the lock for `owner` if nobody holds it.
    ///
    /// Returns `false` on contention. Never blocks or retries.
    pub async fn acquire(
        &self,
        product_id: &ProductId,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let acquired = self
            .ctx
            .store()
            .set_if_absent(&keys::lock_key(product_id), owner, ttl)
            .await?;

        if acquired {
            tracing::debug!(%product_id, owner, "lock acquired");
        } else {
            metrics::counter!("stock_lock_contention_total").increment(1);
            tracing::debug!(%product_id, owner, "lock contended");
        }
        Ok(acquired)
    }

    /// Claims the lock with the configured TTL and wraps it in a guard.
    ///
    /// The claim value is `{owner}:{nonce}`, so the guard only ever
    /// releases its own claim, even after the TTL handed the lock to
    /// someone else.
    pub async fn try_acquire(
        &self,
        product_id: &ProductId,
        owner: &str,
    ) -> Result<Option<LockGuard<S, A>>> {
        let token = format!("{owner}:{}", Uuid::new_v4());
        if !self
            .acquire(product_id, &token, self.ctx.config().lock_ttl)
            .await?
        {
            return Ok(None);
        }

        Ok(Some(LockGuard {
            ctx: Arc::clone(&self.ctx),
            product_id: product_id.clone(),
            token,
            released: false,
        }))
    }

    /// Deletes the lock regardless of who holds it.
    ///
    /// Best effort: failures are logged, never returned.
    pub async fn release(&self, product_id: &ProductId) {
        let key = keys::lock_key(product_id);
        match self.ctx.store().del(&[key]).await {
            Ok(_) => tracing::debug!(%product_id, "lock released"),
            Err(e) => tracing::error!(%product_id, error = %e, "failed to release lock"),
        }
    }

    pub async fn is_locked(&self, product_id: &ProductId) -> Result<bool> {
        Ok(self.ctx.store().exists(&keys::lock_key(product_id)).await?)
    }

    /// Returns the current claim value, if any.
    pub async fn owner(&self, product_id: &ProductId) -> Result<Option<String>> {
        Ok(self.ctx.store().get(&keys::lock_key(product_id)).await?)
    }

    /// Drops a lock held by someone else. Privileged.
    #[tracing::instrument(skip(self, admin), fields(admin = %admin))]
    pub async fn force_release(&self, product_id: &ProductId, admin: &AdminActor) -> Result<bool> {
        let removed = self
            .ctx
            .store()
            .del(&[keys::lock_key(product_id)])
            .await?;
        tracing::warn!(%product_id, removed, "lock force-released");
        Ok(removed > 0)
    }
}

/// A held product lock.
///
/// Call [`LockGuard::release`] on every normal exit path. If the guard is
/// dropped without it (early return, panic) the release is spawned on the
/// current Tokio runtime; outside a runtime the claim is left to expire.
pub struct LockGuard<S, A>
where
    S: StockStore + 'static,
    A: AuthoritativeStore + 'static,
{
    ctx: Arc<StockContext<S, A>>,
    product_id: ProductId,
    token: String,
    released: bool,
}

impl<S, A> LockGuard<S, A>
where
    S: StockStore + 'static,
    A: AuthoritativeStore + 'static,
{
    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// The claim value stored under the lock key.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Releases the claim if it is still ours.
    pub async fn release(mut self) {
        self.released = true;
        release_claim(self.ctx.store(), &self.product_id, &self.token).await;
    }
}

impl<S, A> Drop for LockGuard<S, A>
where
    S: StockStore + 'static,
    A: AuthoritativeStore + 'static,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                product_id = %self.product_id,
                "lock guard dropped outside a runtime, claim left to expire"
            );
            return;
        };

        let ctx = Arc::clone(&self.ctx);
        let product_id = self.product_id.clone();
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            release_claim(ctx.store(), &product_id, &token).await;
        });
    }
}

async fn release_claim<S: StockStore>(store: &S, product_id: &ProductId, token: &str) {
    match store
        .delete_if_equals(&keys::lock_key(product_id), token)
        .await
    {
        Ok(true) => tracing::debug!(%product_id, "lock released"),
        Ok(false) => tracing::warn!(%product_id, "lock expired before release"),
        Err(e) => tracing::error!(%product_id, error = %e, "failed to release lock"),
    }
}
