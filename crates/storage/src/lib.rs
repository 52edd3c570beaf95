//! Ordered key-value storage for Swarm chunk indexes.
//!
//! The [`IndexStore`] trait is the only thing a chunk store needs from the
//! underlying database: point lookups, ordered iteration and atomic batched
//! writes. On top of it, [`Index`] and [`Uint64Field`] give typed access to
//! named key ranges sharing a single keyspace.

use std::fmt::Debug;
use std::ops::ControlFlow;

use auto_impl::auto_impl;

mod batch;
mod index;
mod memory;

pub use batch::{Batch, BatchOp};
pub use index::{Index, Uint64Field, Value};
pub use memory::MemoryIndexStore;

/// Trait that will transform the data to be saved in the DB.
///
/// Encodings must preserve ordering: if `a < b` then
/// `a.encode().as_ref() < b.encode().as_ref()` byte-wise.
pub trait Encode: Send + Sync + Sized + Debug {
    /// Encoded type.
    type Encoded: AsRef<[u8]> + Into<Vec<u8>> + Send + Sync + Ord + Debug;

    /// Encodes data going into the database.
    fn encode(self) -> Self::Encoded;
}

/// Trait that will transform the data to be read from the DB.
pub trait Decode: Send + Sync + Sized + Debug {
    /// Decodes data coming from the database.
    fn decode(value: &[u8]) -> Result<Self, DatabaseError>;

    /// Decodes owned data coming from the database.
    fn decode_owned(value: Vec<u8>) -> Result<Self, DatabaseError> {
        Self::decode(&value)
    }
}

/// Generic trait that enforces the database key to implement [`Encode`] and [`Decode`].
pub trait Key: Encode + Decode + Ord + Clone {}

impl<T> Key for T where T: Encode + Decode + Ord + Clone {}

/// Ordered key-value store backing the chunk indexes.
///
/// Keys are compared byte-wise. Implementations must apply a [`Batch`]
/// atomically: a concurrent reader observes either none or all of its
/// operations.
#[auto_impl(&, Arc, Box)]
pub trait IndexStore: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError>;

    /// Returns true if a value is stored under `key`.
    fn has(&self, key: &[u8]) -> Result<bool, DatabaseError> {
        Ok(self.get(key)?.is_some())
    }

    /// Applies all operations of `batch` as a single atomic write.
    fn write(&self, batch: Batch) -> Result<(), DatabaseError>;

    /// Visits every entry with a key `>= start` in ascending key order.
    ///
    /// The callback must not write to the same store.
    fn iterate_from(
        &self,
        start: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>, DatabaseError>,
    ) -> Result<(), DatabaseError>;
}

/// Database error type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to decode a key from a table.
    #[error("failed to decode a key from a table")]
    Decode,
    /// Failed to serialize or deserialize a value.
    #[error("value codec error: {0}")]
    Codec(String),
    /// The storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<postcard::Error> for DatabaseError {
    fn from(err: postcard::Error) -> Self {
        DatabaseError::Codec(err.to_string())
    }
}
