//! Typed views over ranges of a shared keyspace.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Batch, DatabaseError, IndexStore, Key};

/// Prefix reserved for [`Uint64Field`] keys. Index ids must be non-zero.
const FIELD_PREFIX: u8 = 0;

/// Generic trait for values stored in an [`Index`].
///
/// Values are serialized with postcard.
pub trait Value: Serialize + DeserializeOwned + Send + Sync + Debug {}

impl<T> Value for T where T: Serialize + DeserializeOwned + Send + Sync + Debug {}

/// A named index: every key is stored as `id || key.encode()`.
///
/// Iteration order is the byte order of the encoded keys, so the key
/// encoding decides what "ordered by" means for each index.
pub struct Index<K, V> {
    id: u8,
    name: &'static str,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Debug for Index<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl<K: Key, V: Value> Index<K, V> {
    /// Define an index with a unique non-zero id.
    pub const fn new(id: u8, name: &'static str) -> Self {
        assert!(id != FIELD_PREFIX, "index id 0 is reserved for fields");
        Self {
            id,
            name,
            _marker: PhantomData,
        }
    }

    /// Human readable index name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn raw_key(&self, key: K) -> Vec<u8> {
        let encoded = key.encode();
        let encoded = encoded.as_ref();
        let mut raw = Vec::with_capacity(1 + encoded.len());
        raw.push(self.id);
        raw.extend_from_slice(encoded);
        raw
    }

    /// Look up a single value.
    pub fn get<S: IndexStore + ?Sized>(&self, store: &S, key: K) -> Result<Option<V>, DatabaseError> {
        store
            .get(&self.raw_key(key))?
            .map(|value| postcard::from_bytes(&value).map_err(DatabaseError::from))
            .transpose()
    }

    /// Check whether a key is present.
    pub fn has<S: IndexStore + ?Sized>(&self, store: &S, key: K) -> Result<bool, DatabaseError> {
        store.has(&self.raw_key(key))
    }

    /// Queue an insert of `key -> value` into `batch`.
    pub fn put_in_batch(&self, batch: &mut Batch, key: K, value: &V) -> Result<(), DatabaseError> {
        batch.put(self.raw_key(key), postcard::to_allocvec(value)?);
        Ok(())
    }

    /// Queue a removal of `key` into `batch`.
    pub fn delete_in_batch(&self, batch: &mut Batch, key: K) {
        batch.delete(self.raw_key(key));
    }

    /// Visit entries in key order, starting at `start` (inclusive) or at the
    /// first entry of the index.
    pub fn iterate<S, F>(&self, store: &S, start: Option<K>, mut visit: F) -> Result<(), DatabaseError>
    where
        S: IndexStore + ?Sized,
        F: FnMut(K, V) -> Result<ControlFlow<()>, DatabaseError>,
    {
        let start = match start {
            Some(key) => self.raw_key(key),
            None => vec![self.id],
        };
        store.iterate_from(&start, &mut |raw_key, raw_value| {
            let Some((&id, encoded)) = raw_key.split_first() else {
                return Ok(ControlFlow::Break(()));
            };
            if id != self.id {
                return Ok(ControlFlow::Break(()));
            }
            let key = K::decode(encoded)?;
            let value = postcard::from_bytes(raw_value)?;
            visit(key, value)
        })
    }

    /// Count all entries of the index.
    pub fn count<S: IndexStore + ?Sized>(&self, store: &S) -> Result<usize, DatabaseError> {
        let mut count = 0;
        self.iterate(store, None, |_, _| {
            count += 1;
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(count)
    }
}

/// A single persisted `u64` under a fixed name, e.g. a counter.
#[derive(Debug)]
pub struct Uint64Field {
    name: &'static str,
}

impl Uint64Field {
    /// Define a field.
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    fn raw_key(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(1 + self.name.len());
        raw.push(FIELD_PREFIX);
        raw.extend_from_slice(self.name.as_bytes());
        raw
    }

    /// Read the field, defaulting to zero when it was never written.
    pub fn get<S: IndexStore + ?Sized>(&self, store: &S) -> Result<u64, DatabaseError> {
        match store.get(&self.raw_key())? {
            Some(raw) => {
                let bytes: [u8; 8] = raw.as_slice().try_into().map_err(|_| DatabaseError::Decode)?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Queue a write of `value` into `batch`.
    pub fn put_in_batch(&self, batch: &mut Batch, value: u64) {
        batch.put(self.raw_key(), value.to_be_bytes().to_vec());
    }
}
