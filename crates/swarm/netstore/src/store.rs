//! Fetch-coalescing front end over a [`ChunkStore`].

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use vertex_swarm_api::{CancelReason, ChunkStore, StoreWait, SwarmError, SwarmResult};
use vertex_swarm_primitives::{Chunk, ChunkAddress};

use crate::cache::FetcherCache;
use crate::fetcher::{FetchGuard, Fetcher, FetcherState};
use crate::metrics::NetStoreMetrics;
use crate::{NetStoreConfig, Request, Retrieve};

/// Deferred fetch returned by [`NetStore::has`].
pub type HasWait = Box<dyn FnOnce(Request) -> BoxFuture<'static, SwarmResult<()>> + Send>;

/// Outcome of the local check done under the store lock.
enum Lookup {
    Local(Chunk),
    Remote(FetchGuard),
}

struct Inner<S> {
    store: S,
    /// Makes "is it local" and "is there a fetcher" one step, and orders
    /// puts with fetcher creation.
    lock: Mutex<()>,
    fetchers: Arc<FetcherCache>,
    retrieve: Arc<dyn Retrieve>,
    config: NetStoreConfig,
    shutdown: CancellationToken,
    metrics: NetStoreMetrics,
}

/// Chunk store that fetches missing chunks from the network, once per
/// address no matter how many callers wait for it.
///
/// Cheap to clone; clones share the store and the fetchers.
pub struct NetStore<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for NetStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for NetStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetStore")
            .field("config", &self.inner.config)
            .field("fetchers", &self.inner.fetchers.len())
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<S: ChunkStore + 'static> NetStore<S> {
    /// Wrap `store`, fetching misses through `retrieve`.
    pub fn new(store: S, retrieve: impl Retrieve, config: NetStoreConfig) -> Self {
        let metrics = NetStoreMetrics::default();
        Self {
            inner: Arc::new(Inner {
                store,
                lock: Mutex::new(()),
                fetchers: Arc::new(FetcherCache::new(config.fetcher_cache_capacity, metrics.clone())),
                retrieve: Arc::new(retrieve),
                config,
                shutdown: CancellationToken::new(),
                metrics,
            }),
        }
    }

    /// The wrapped store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Store a chunk.
    ///
    /// Returns `None` if the chunk was already stored. Otherwise returns the
    /// store's durability wait, and hands the chunk to any fetcher waiting
    /// for it.
    pub fn put(&self, chunk: Chunk) -> SwarmResult<Option<StoreWait>> {
        let _lock = self.inner.lock.lock();
        let Some(wait) = self.inner.store.put(chunk.clone())? else {
            return Ok(None);
        };

        if let Some(fetcher) = self.inner.fetchers.peek(chunk.address()) {
            fetcher.deliver(chunk);
        }
        Ok(Some(wait))
    }

    /// Get a chunk, fetching it from the network if it is not stored.
    ///
    /// Waits until the chunk is delivered or `request` ends.
    pub async fn get(&self, request: Request, address: &ChunkAddress) -> SwarmResult<Chunk> {
        match self.lookup(address)? {
            Lookup::Local(chunk) => Ok(chunk),
            Lookup::Remote(guard) => guard.fetch(request).await,
        }
    }

    /// Check whether a chunk is stored without waiting.
    ///
    /// Returns `None` if it is, otherwise a function that fetches it like
    /// [`get`](Self::get) once called.
    pub fn has(&self, address: &ChunkAddress) -> SwarmResult<Option<HasWait>> {
        self.ensure_open(address)?;
        match self.inner.store.get(address) {
            Ok(_) => Ok(None),
            Err(err) if err.is_not_found() => {
                let netstore = self.clone();
                let address = *address;
                Ok(Some(Box::new(move |request| {
                    async move { netstore.get(request, &address).await.map(|_| ()) }.boxed()
                })))
            }
            Err(err) => Err(err),
        }
    }

    /// Close the store.
    ///
    /// Every fetcher is stopped: waiting callers fail with
    /// [`CancelReason::Shutdown`] and fetcher tasks exit. The wrapped store
    /// is closed last.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        let fetchers = self.inner.fetchers.clear();
        debug!(fetchers = fetchers.len(), "Closing net store");
        self.inner.store.close();
    }

    /// Number of cached fetchers.
    pub fn fetcher_count(&self) -> usize {
        self.inner.fetchers.len()
    }

    /// Requests waiting on the fetcher for `address`, if one exists.
    pub fn pending_requests(&self, address: &ChunkAddress) -> Option<usize> {
        self.inner
            .fetchers
            .peek(address)
            .map(|fetcher| fetcher.request_count())
    }

    /// State of the fetcher for `address`, if one exists.
    pub fn fetcher_state(&self, address: &ChunkAddress) -> Option<FetcherState> {
        self.inner.fetchers.peek(address).map(|fetcher| fetcher.state())
    }

    fn ensure_open(&self, address: &ChunkAddress) -> SwarmResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SwarmError::Cancelled {
                address: *address,
                reason: CancelReason::Shutdown,
                status: None,
            });
        }
        Ok(())
    }

    fn lookup(&self, address: &ChunkAddress) -> SwarmResult<Lookup> {
        self.ensure_open(address)?;
        let inner = &self.inner;
        let _lock = inner.lock.lock();

        match inner.store.get(address) {
            Ok(chunk) => {
                inner.metrics.local_hits_total.increment(1);
                return Ok(Lookup::Local(chunk));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let guard = inner.fetchers.attach_or_spawn(*address, |id, on_stop| {
            trace!(%address, id, "Creating fetcher");
            Fetcher::spawn(
                id,
                *address,
                Arc::clone(&inner.retrieve),
                inner.config,
                &inner.shutdown,
                inner.metrics.clone(),
                on_stop,
            )
        });
        Ok(Lookup::Remote(guard))
    }
}
