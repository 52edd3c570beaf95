//! NetStore metrics.

use metrics::{Counter, Gauge};

/// NetStore metrics.
#[derive(Clone, Debug)]
pub(crate) struct NetStoreMetrics {
    /// Fetchers created on a local miss.
    pub(crate) fetchers_created_total: Counter,
    /// Fetchers removed from the cache.
    pub(crate) fetchers_removed_total: Counter,
    /// Fetchers currently cached.
    pub(crate) fetchers_active: Gauge,
    /// Calls into the retrieve function.
    pub(crate) retrieve_attempts_total: Counter,
    /// Failed or timed out retrieve attempts.
    pub(crate) retrieve_failures_total: Counter,
    /// Chunks delivered to a waiting fetcher.
    pub(crate) deliveries_total: Counter,
    /// Gets answered by the wrapped store.
    pub(crate) local_hits_total: Counter,
}

impl Default for NetStoreMetrics {
    fn default() -> Self {
        Self {
            fetchers_created_total: metrics::counter!("netstore.fetchers_created_total"),
            fetchers_removed_total: metrics::counter!("netstore.fetchers_removed_total"),
            fetchers_active: metrics::gauge!("netstore.fetchers_active"),
            retrieve_attempts_total: metrics::counter!("netstore.retrieve_attempts_total"),
            retrieve_failures_total: metrics::counter!("netstore.retrieve_failures_total"),
            deliveries_total: metrics::counter!("netstore.deliveries_total"),
            local_hits_total: metrics::counter!("netstore.local_hits_total"),
        }
    }
}

impl NetStoreMetrics {
    pub(crate) fn set_active(&self, active: usize) {
        self.fetchers_active.set(active as f64);
    }
}
