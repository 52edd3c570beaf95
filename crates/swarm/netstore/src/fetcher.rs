//! Per-address fetch coordination.
//!
//! A [`Fetcher`] exists while at least one caller waits for a chunk that
//! is not stored locally. Callers hold a [`FetchGuard`]; the fetcher's task
//! issues retrieve attempts while guards are alive and the chunk has not been
//! delivered, and the last guard to drop stops the fetcher. Every attempt is
//! issued with a request that has not ended.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::OptionFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use vertex_swarm_api::{CancelReason, FetchError, SwarmError, SwarmResult};
use vertex_swarm_primitives::{Chunk, ChunkAddress};

use crate::metrics::NetStoreMetrics;
use crate::{NetStoreConfig, Request, Retrieve, RetrieveFuture};

/// Request counter value once the fetcher has stopped.
const STOPPED: usize = usize::MAX;

/// Called once when a fetcher stops.
pub(crate) type OnStop = Box<dyn FnOnce() + Send>;

/// Lifecycle of a [`Fetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum FetcherState {
    /// Created, no retrieve issued yet.
    Idle,
    /// One retrieve attempt in flight.
    Retrieving,
    /// A previous attempt failed; another is in flight.
    Retrying,
    /// The chunk was delivered.
    Delivered,
    /// No requests remain; the task has exited or is exiting.
    Stopped,
}

/// Coordinates every local request for one missing chunk.
pub struct Fetcher {
    id: u64,
    address: ChunkAddress,
    state: AtomicU8,
    /// Live requests, or [`STOPPED`].
    requests: AtomicUsize,
    request_tx: mpsc::UnboundedSender<Request>,
    delivered: watch::Sender<Option<Chunk>>,
    status: Mutex<Option<FetchError>>,
    stopped: CancellationToken,
    on_stop: Mutex<Option<OnStop>>,
    metrics: NetStoreMetrics,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("requests", &self.request_count())
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Create a fetcher, start its task and attach the first request.
    ///
    /// The task exits when the fetcher stops or `shutdown` is cancelled.
    pub(crate) fn spawn(
        id: u64,
        address: ChunkAddress,
        retrieve: Arc<dyn Retrieve>,
        config: NetStoreConfig,
        shutdown: &CancellationToken,
        metrics: NetStoreMetrics,
        on_stop: OnStop,
    ) -> (Arc<Self>, FetchGuard) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (delivered, _) = watch::channel(None);

        let fetcher = Arc::new(Self {
            id,
            address,
            state: AtomicU8::new(FetcherState::Idle as u8),
            requests: AtomicUsize::new(1),
            request_tx,
            delivered,
            status: Mutex::new(None),
            stopped: shutdown.child_token(),
            on_stop: Mutex::new(Some(on_stop)),
            metrics,
        });

        let task = FetcherTask {
            fetcher: Arc::clone(&fetcher),
            request_rx,
            retrieve,
            config,
        };
        tokio::spawn(task.run());

        trace!(%address, id, "Spawned fetcher");
        let guard = FetchGuard {
            fetcher: Arc::clone(&fetcher),
        };
        (fetcher, guard)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Address of the chunk being fetched.
    pub fn address(&self) -> &ChunkAddress {
        &self.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FetcherState {
        FetcherState::from_repr(self.state.load(Ordering::Acquire)).unwrap_or(FetcherState::Stopped)
    }

    /// Number of attached requests.
    pub fn request_count(&self) -> usize {
        match self.requests.load(Ordering::Acquire) {
            STOPPED => 0,
            count => count,
        }
    }

    /// Status of the last failed retrieve attempt.
    pub fn last_status(&self) -> Option<FetchError> {
        self.status.lock().clone()
    }

    /// True once a chunk was delivered.
    pub fn is_delivered(&self) -> bool {
        self.delivered.borrow().is_some()
    }

    /// True once the fetcher stopped, either because no requests remained
    /// or because the store shut down.
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Hand the chunk to every waiting request.
    ///
    /// Only the first delivery is broadcast; later ones are ignored.
    pub fn deliver(&self, chunk: Chunk) {
        if chunk.address() != &self.address {
            warn!(expected = %self.address, got = %chunk.address(), "Ignoring delivery of wrong chunk");
            return;
        }
        let first = self.delivered.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(chunk);
            true
        });
        if first {
            self.transition(FetcherState::Delivered);
            self.metrics.deliveries_total.increment(1);
            debug!(address = %self.address, "Delivered chunk to fetcher");
        }
    }

    /// Attach another request, unless the fetcher is stopping.
    pub(crate) fn try_attach(self: &Arc<Self>) -> Option<FetchGuard> {
        let mut current = self.requests.load(Ordering::Acquire);
        loop {
            if current == STOPPED || self.stopped.is_cancelled() {
                return None;
            }
            match self.requests.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(FetchGuard {
                        fetcher: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn detach(&self) {
        // a request attaching between the decrement and the swap keeps the
        // fetcher alive
        if self.requests.fetch_sub(1, Ordering::AcqRel) == 1
            && self
                .requests
                .compare_exchange(0, STOPPED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.stop();
        }
    }

    fn stop(&self) {
        self.transition(FetcherState::Stopped);
        let on_stop = self.on_stop.lock().take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }
        self.stopped.cancel();
        trace!(address = %self.address, id = self.id, "Stopped fetcher");
    }

    fn transition(&self, to: FetcherState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match FetcherState::from_repr(current) {
                    Some(FetcherState::Stopped) => None,
                    Some(FetcherState::Delivered) if to != FetcherState::Stopped => None,
                    _ => Some(to as u8),
                }
            });
    }

    fn set_status(&self, status: FetchError) {
        *self.status.lock() = Some(status);
    }

    async fn wait_delivered(&self) -> Option<Chunk> {
        let mut delivered = self.delivered.subscribe();
        let result = delivered.wait_for(Option::is_some).await;
        result.ok()?.clone()
    }
}

/// A request attached to a [`Fetcher`].
///
/// Dropping the guard detaches the request; the last one to go stops the
/// fetcher and removes it from the cache.
#[derive(Debug)]
pub struct FetchGuard {
    fetcher: Arc<Fetcher>,
}

impl FetchGuard {
    /// The fetcher this request is attached to.
    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    /// Submit `request` and wait for the chunk.
    ///
    /// Fails with [`SwarmError::Cancelled`] when the request ends first or
    /// the store shuts down, annotated with the last retrieve status.
    pub async fn fetch(self, request: Request) -> SwarmResult<Chunk> {
        let fetcher = &self.fetcher;
        if !fetcher.is_stopped() {
            // the task only exits once stopped
            let _ = fetcher.request_tx.send(request.clone());
        }

        let reason = tokio::select! {
            biased;
            Some(chunk) = fetcher.wait_delivered() => return Ok(chunk),
            reason = request.done() => reason,
            _ = fetcher.stopped.cancelled() => CancelReason::Shutdown,
        };

        let status = fetcher.last_status();
        debug!(address = %fetcher.address, %reason, ?status, "Fetch ended without chunk");
        Err(SwarmError::Cancelled {
            address: fetcher.address,
            reason,
            status,
        })
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.fetcher.detach();
    }
}

/// Background loop driving retrieve attempts for one fetcher.
struct FetcherTask {
    fetcher: Arc<Fetcher>,
    request_rx: mpsc::UnboundedReceiver<Request>,
    retrieve: Arc<dyn Retrieve>,
    config: NetStoreConfig,
}

impl FetcherTask {
    async fn run(mut self) {
        let fetcher = Arc::clone(&self.fetcher);
        let mut delivered = fetcher.delivered.subscribe();
        let mut attempt: Option<RetrieveFuture> = None;
        // requests still waiting, most recent last
        let mut live: Vec<Request> = Vec::new();

        loop {
            if fetcher.is_delivered() {
                // nothing left to retrieve; wait for the last request to go
                fetcher.stopped.cancelled().await;
                break;
            }

            tokio::select! {
                biased;
                _ = fetcher.stopped.cancelled() => break,
                _ = delivered.changed() => {}
                Some(request) = self.request_rx.recv() => {
                    live.retain(|request| !request.is_done());
                    if request.is_done() {
                        continue;
                    }
                    if attempt.is_none() {
                        fetcher.transition(FetcherState::Retrieving);
                        attempt = Some(self.start_attempt(&request));
                    }
                    live.push(request);
                }
                Some(result) = OptionFuture::from(attempt.as_mut()) => {
                    attempt = None;
                    match result {
                        Ok(()) => trace!(address = %fetcher.address, "Retrieve attempt completed"),
                        Err(err) => {
                            fetcher.metrics.retrieve_failures_total.increment(1);
                            debug!(address = %fetcher.address, error = %err, "Retrieve attempt failed");
                            fetcher.set_status(err);

                            // never retry on behalf of an ended request
                            live.retain(|request| !request.is_done());
                            if fetcher.request_count() > 0
                                && !fetcher.is_delivered()
                                && let Some(request) = live.last()
                            {
                                fetcher.transition(FetcherState::Retrying);
                                attempt = Some(self.start_attempt(request));
                            }
                        }
                    }
                }
            }
        }

        fetcher.transition(FetcherState::Stopped);
        trace!(address = %fetcher.address, "Fetcher task exited");
    }

    /// Call the retrieve hook, bounding the search by the search timeout.
    fn start_attempt(&self, request: &Request) -> RetrieveFuture {
        let fetcher = &self.fetcher;
        fetcher.metrics.retrieve_attempts_total.increment(1);
        trace!(address = %fetcher.address, "Retrieving chunk");

        match self.retrieve.retrieve(request, fetcher) {
            Ok(search) => {
                let timeout = self.config.search_timeout;
                async move {
                    tokio::time::timeout(timeout, search)
                        .await
                        .unwrap_or(Err(FetchError::SearchTimeout))
                }
                .boxed()
            }
            Err(err) => {
                let backoff = self.config.retry_backoff;
                async move {
                    tokio::time::sleep(backoff).await;
                    Err(err)
                }
                .boxed()
            }
        }
    }
}
