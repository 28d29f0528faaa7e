use std::sync::Arc;

use stock_store::{AuthoritativeStore, StockStore};

use crate::config::StockConfig;

/// Everything a service needs: both stores and the configuration.
///
/// Built once and shared behind an `Arc`; every service holds a clone.
pub struct StockContext<S, A> {
    store: S,
    authoritative: A,
    config: StockConfig,
}

impl<S, A> StockContext<S, A>
where
    S: StockStore,
    A: AuthoritativeStore,
{
    /// Creates a shared context.
    pub fn new(store: S, authoritative: A, config: StockConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            authoritative,
            config,
        })
    }

    /// The fast-path store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The system of record.
    pub fn authoritative(&self) -> &A {
        &self.authoritative
    }

    pub fn config(&self) -> &StockConfig {
        &self.config
    }
}
