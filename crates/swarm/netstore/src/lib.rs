//! Network-aware chunk store.
//!
//! [`NetStore`] wraps any [`ChunkStore`](vertex_swarm_api::ChunkStore) and
//! answers reads locally when it can. On a miss it coalesces every caller
//! waiting for the same address onto one [`Fetcher`], which drives the
//! injected [`Retrieve`] hook until the chunk is delivered by a local
//! [`NetStore::put`] or no caller is left waiting.
//!
//! ```text
//! get(request, address)
//!   ├─ stored locally ──────────────► chunk
//!   └─ missing ─► fetcher cache ─► Fetcher ─► retrieve(...)
//!                                     ▲
//! put(chunk) ─── deliver ─────────────┘ wakes every waiting caller
//! ```

mod args;
mod cache;
mod fetcher;
mod metrics;
mod request;
mod retrieve;
mod store;

pub use args::{
    DEFAULT_FETCHER_CACHE_CAPACITY, DEFAULT_RETRY_BACKOFF, DEFAULT_SEARCH_TIMEOUT, NetStoreArgs,
    NetStoreConfig,
};
pub use fetcher::{FetchGuard, Fetcher, FetcherState};
pub use request::Request;
pub use retrieve::{Retrieve, RetrieveFuture};
pub use store::{HasWait, NetStore};
