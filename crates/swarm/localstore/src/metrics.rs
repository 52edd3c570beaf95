//! Local store metrics.

use metrics::{Counter, Gauge};

use crate::Mode;

/// Local store metrics.
#[derive(Clone, Debug)]
pub(crate) struct LocalStoreMetrics {
    /// Chunks currently counted by the size counter.
    size: Gauge,
    /// Lookups that found no chunk.
    not_found_total: Counter,
}

impl Default for LocalStoreMetrics {
    fn default() -> Self {
        Self {
            size: metrics::gauge!("localstore.size"),
            not_found_total: metrics::counter!("localstore.not_found_total"),
        }
    }
}

impl LocalStoreMetrics {
    pub(crate) fn record_put(&self, mode: Mode) {
        let mode: &'static str = mode.into();
        metrics::counter!("localstore.put_total", "mode" => mode).increment(1);
    }

    pub(crate) fn record_get(&self, mode: Mode) {
        let mode: &'static str = mode.into();
        metrics::counter!("localstore.get_total", "mode" => mode).increment(1);
    }

    pub(crate) fn record_not_found(&self) {
        self.not_found_total.increment(1);
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.size.set(size as f64);
    }
}
