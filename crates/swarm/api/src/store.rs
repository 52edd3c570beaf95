//! Chunk store contract.

use auto_impl::auto_impl;
use futures::future::BoxFuture;
use vertex_swarm_primitives::{Chunk, ChunkAddress};

use crate::SwarmResult;

/// Resolves once a stored chunk is durable.
pub type StoreWait = BoxFuture<'static, SwarmResult<()>>;

/// Chunk persistence consumed by the network layer.
///
/// Implementations must support concurrent `put`/`get` from many callers.
#[auto_impl(&, Arc, Box)]
pub trait ChunkStore: Send + Sync {
    /// Store a chunk.
    ///
    /// Returns `None` when the chunk was already present, otherwise a future
    /// the caller may await to learn when the chunk is durable.
    fn put(&self, chunk: Chunk) -> SwarmResult<Option<StoreWait>>;

    /// Get a chunk, failing with [`SwarmError::ChunkNotFound`](crate::SwarmError::ChunkNotFound)
    /// when absent.
    fn get(&self, address: &ChunkAddress) -> SwarmResult<Chunk>;

    /// Release the store. Later operations fail.
    fn close(&self);
}
