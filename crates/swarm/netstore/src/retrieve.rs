//! Hook into the network layer.

use futures::future::BoxFuture;
use vertex_swarm_api::FetchError;

use crate::{Fetcher, Request};

/// Resolves when a remote search succeeded or was abandoned.
pub type RetrieveFuture = BoxFuture<'static, Result<(), FetchError>>;

/// Starts a remote search for a fetcher's chunk.
///
/// The chunk itself is not returned: it is expected to reach the store via
/// [`NetStore::put`](crate::NetStore::put), which delivers it to the fetcher.
/// The returned future only reports how the search ended.
pub trait Retrieve: Send + Sync + 'static {
    /// Begin a search on behalf of `request`.
    fn retrieve(&self, request: &Request, fetcher: &Fetcher) -> Result<RetrieveFuture, FetchError>;
}

impl<F> Retrieve for F
where
    F: Fn(&Request, &Fetcher) -> Result<RetrieveFuture, FetchError> + Send + Sync + 'static,
{
    fn retrieve(&self, request: &Request, fetcher: &Fetcher) -> Result<RetrieveFuture, FetchError> {
        self(request, fetcher)
    }
}
