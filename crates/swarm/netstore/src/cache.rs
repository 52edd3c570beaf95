//! Bounded cache of live fetchers.
//!
//! The [`FetcherCache`] maps each address with an outstanding remote fetch
//! to its [`Fetcher`]. All lookups, inserts and removals happen under one
//! mutex, held only for the cache operation itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hashlink::LruCache;
use parking_lot::Mutex;
use tracing::{trace, warn};
use vertex_swarm_primitives::ChunkAddress;

use crate::fetcher::{FetchGuard, Fetcher, OnStop};
use crate::metrics::NetStoreMetrics;

/// Least recently used entries inspected per eviction.
const EVICTION_SCAN: usize = 64;

/// LRU cache holding at most one fetcher per address.
///
/// Eviction only drops fetchers without attached requests. When every cached
/// fetcher is busy the cache grows past its capacity instead.
pub(crate) struct FetcherCache {
    fetchers: Mutex<LruCache<ChunkAddress, Arc<Fetcher>>>,
    capacity: usize,
    next_id: AtomicU64,
    metrics: NetStoreMetrics,
}

impl FetcherCache {
    pub(crate) fn new(capacity: usize, metrics: NetStoreMetrics) -> Self {
        Self {
            fetchers: Mutex::new(LruCache::new_unbounded()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(0),
            metrics,
        }
    }

    /// Attach to the live fetcher for `address`, or create one with `spawn`.
    ///
    /// `spawn` receives the new fetcher's id and the callback that removes it
    /// from this cache when it stops.
    pub(crate) fn attach_or_spawn<F>(self: &Arc<Self>, address: ChunkAddress, spawn: F) -> FetchGuard
    where
        F: FnOnce(u64, OnStop) -> (Arc<Fetcher>, FetchGuard),
    {
        let mut fetchers = self.fetchers.lock();

        if let Some(guard) = fetchers.get(&address).and_then(Fetcher::try_attach) {
            trace!(%address, "Attached to existing fetcher");
            return guard;
        }

        // none cached, or the cached one is stopping and replaced here
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cache = Arc::downgrade(self);
        let on_stop: OnStop = Box::new(move || remove_stopped(&cache, &address, id));

        let (fetcher, guard) = spawn(id, on_stop);
        fetchers.insert(address, fetcher);
        self.metrics.fetchers_created_total.increment(1);

        self.evict_idle(&mut fetchers);
        self.metrics.set_active(fetchers.len());
        guard
    }

    /// Drop idle fetchers from the least recently used end until the cache
    /// is within capacity, looking at a bounded window only.
    fn evict_idle(&self, fetchers: &mut LruCache<ChunkAddress, Arc<Fetcher>>) {
        let excess = fetchers.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }

        let idle: Vec<ChunkAddress> = fetchers
            .iter()
            .take(EVICTION_SCAN.max(excess))
            .filter(|(_, fetcher)| fetcher.request_count() == 0)
            .map(|(address, _)| *address)
            .take(excess)
            .collect();

        for address in idle {
            fetchers.remove(&address);
            self.metrics.fetchers_removed_total.increment(1);
            trace!(%address, "Evicted idle fetcher");
        }

        if fetchers.len() > self.capacity {
            warn!(
                len = fetchers.len(),
                capacity = self.capacity,
                "Fetcher cache over capacity, every fetcher has waiting requests"
            );
        }
    }

    /// Remove the fetcher for `address` if it is still the one with `id`.
    pub(crate) fn remove_if(&self, address: &ChunkAddress, id: u64) -> bool {
        let mut fetchers = self.fetchers.lock();
        if !fetchers.peek(address).is_some_and(|fetcher| fetcher.id() == id) {
            return false;
        }
        fetchers.remove(address);
        self.metrics.fetchers_removed_total.increment(1);
        self.metrics.set_active(fetchers.len());
        true
    }

    /// The cached fetcher for `address`, leaving its recency untouched.
    pub(crate) fn peek(&self, address: &ChunkAddress) -> Option<Arc<Fetcher>> {
        self.fetchers.lock().peek(address).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.fetchers.lock().len()
    }

    /// Drop every cached fetcher, returning them.
    pub(crate) fn clear(&self) -> Vec<Arc<Fetcher>> {
        let mut fetchers = self.fetchers.lock();
        let drained = fetchers.iter().map(|(_, fetcher)| Arc::clone(fetcher)).collect();
        fetchers.clear();
        self.metrics.set_active(0);
        drained
    }
}

fn remove_stopped(cache: &Weak<FetcherCache>, address: &ChunkAddress, id: u64) {
    if let Some(cache) = cache.upgrade()
        && cache.remove_if(address, id)
    {
        trace!(%address, id, "Removed stopped fetcher");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::FutureExt;
    use futures::future;
    use tokio_util::sync::CancellationToken;
    use vertex_swarm_api::FetchError;

    use super::*;
    use crate::{NetStoreConfig, Request, Retrieve, RetrieveFuture};

    fn address(n: u8) -> ChunkAddress {
        ChunkAddress::new([n; 32])
    }

    fn cache(capacity: usize) -> Arc<FetcherCache> {
        Arc::new(FetcherCache::new(capacity, NetStoreMetrics::default()))
    }

    fn attach(cache: &Arc<FetcherCache>, shutdown: &CancellationToken, address: ChunkAddress) -> FetchGuard {
        let retrieve: Arc<dyn Retrieve> =
            Arc::new(|_: &Request, _: &Fetcher| -> Result<RetrieveFuture, FetchError> {
                Ok(future::pending().boxed())
            });
        cache.attach_or_spawn(address, |id, on_stop| {
            Fetcher::spawn(
                id,
                address,
                retrieve,
                NetStoreConfig::default(),
                shutdown,
                NetStoreMetrics::default(),
                on_stop,
            )
        })
    }

    #[tokio::test]
    async fn test_one_fetcher_per_address() {
        let cache = cache(10);
        let shutdown = CancellationToken::new();

        let first = attach(&cache, &shutdown, address(1));
        let second = attach(&cache, &shutdown, address(1));

        assert!(Arc::ptr_eq(first.fetcher(), second.fetcher()));
        assert_eq!(first.fetcher().request_count(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_fetcher_removes_itself() {
        let cache = cache(10);
        let shutdown = CancellationToken::new();

        let guard = attach(&cache, &shutdown, address(1));
        let fetcher = Arc::clone(guard.fetcher());
        drop(guard);

        assert!(fetcher.is_stopped());
        assert_eq!(cache.len(), 0);

        // a new request gets a fresh fetcher
        let guard = attach(&cache, &shutdown, address(1));
        assert!(!Arc::ptr_eq(guard.fetcher(), &fetcher));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_if_ignores_replaced_fetcher() {
        let cache = cache(10);
        let shutdown = CancellationToken::new();

        let guard = attach(&cache, &shutdown, address(1));
        let id = guard.fetcher().id();

        assert!(!cache.remove_if(&address(1), id + 1));
        assert_eq!(cache.len(), 1);
        assert!(cache.remove_if(&address(1), id));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_eviction_never_drops_active_fetchers() {
        let cache = cache(2);
        let shutdown = CancellationToken::new();

        let guards: Vec<_> = (1..=3).map(|n| attach(&cache, &shutdown, address(n))).collect();

        // all busy: the cache grows instead of dropping a fetch
        assert_eq!(cache.len(), 3);
        for guard in &guards {
            assert!(cache.peek(guard.fetcher().address()).is_some());
        }

        drop(guards);
        assert_eq!(cache.len(), 0);
    }

    /// A stopped fetcher left in the cache, as when its removal races an insert.
    fn insert_idle(cache: &Arc<FetcherCache>, shutdown: &CancellationToken, address: ChunkAddress) -> Arc<Fetcher> {
        let retrieve: Arc<dyn Retrieve> =
            Arc::new(|_: &Request, _: &Fetcher| -> Result<RetrieveFuture, FetchError> {
                Ok(future::pending().boxed())
            });
        let (fetcher, guard) = Fetcher::spawn(
            u64::MAX,
            address,
            retrieve,
            NetStoreConfig::default(),
            shutdown,
            NetStoreMetrics::default(),
            Box::new(|| {}),
        );
        drop(guard);
        cache.fetchers.lock().insert(address, Arc::clone(&fetcher));
        fetcher
    }

    #[tokio::test]
    async fn test_eviction_drops_idle_fetcher_first() {
        let cache = cache(2);
        let shutdown = CancellationToken::new();

        insert_idle(&cache, &shutdown, address(9));
        let _a = attach(&cache, &shutdown, address(1));
        assert_eq!(cache.len(), 2);

        let _b = attach(&cache, &shutdown, address(2));
        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&address(9)).is_none());
        assert!(cache.peek(&address(1)).is_some());
        assert!(cache.peek(&address(2)).is_some());
    }

    #[tokio::test]
    async fn test_peek_keeps_eviction_order() {
        let cache = cache(2);
        let shutdown = CancellationToken::new();

        insert_idle(&cache, &shutdown, address(9));
        insert_idle(&cache, &shutdown, address(8));
        assert!(cache.peek(&address(9)).is_some());

        let _a = attach(&cache, &shutdown, address(1));
        assert!(cache.peek(&address(9)).is_none());
        assert!(cache.peek(&address(8)).is_some());
    }

    #[tokio::test]
    async fn test_eviction_scans_bounded_window() {
        let cache = cache(10);
        let shutdown = CancellationToken::new();

        let _busy: Vec<_> = (0..EVICTION_SCAN as u8)
            .map(|n| attach(&cache, &shutdown, address(n)))
            .collect();
        // newest entry, outside the window at the least recently used end
        insert_idle(&cache, &shutdown, address(200));
        let _last = attach(&cache, &shutdown, address(201));

        assert!(cache.peek(&address(200)).is_some());
        assert_eq!(cache.len(), EVICTION_SCAN + 2);
    }

    #[tokio::test]
    async fn test_clear_drains_all() {
        let cache = cache(10);
        let shutdown = CancellationToken::new();

        let _a = attach(&cache, &shutdown, address(1));
        let _b = attach(&cache, &shutdown, address(2));

        assert_eq!(cache.clear().len(), 2);
        assert_eq!(cache.len(), 0);
    }
}
