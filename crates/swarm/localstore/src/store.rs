//! LocalStore implementation.
//!
//! This module provides [`LocalStore`], which owns the index store and the
//! retrieval layout helpers shared by every [`Accessor`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};
use vertex_storage::{Batch, DatabaseError, Index, IndexStore};
use vertex_swarm_primitives::{Chunk, ChunkAddress};

use crate::metrics::LocalStoreMetrics;
use crate::schema::{
    AddressKey, CompositeRecord, DataRecord, GC, GcRecord, IndexItem, PULL, PUSH,
    RETRIEVAL_ACCESS, RETRIEVAL_COMPOSITE, RETRIEVAL_DATA, SIZE, TimestampKey,
};
use crate::{Accessor, Clock, LocalStoreError, LocalStoreResult, Mode, SystemClock};

/// How the retrieval index is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RetrievalLayout {
    /// Separate data and access records; the access record only exists
    /// once an access has been recorded.
    #[default]
    Split,
    /// One record per chunk holding data and both timestamps.
    Composite,
}

/// Local store configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStoreConfig {
    /// Retrieval index layout.
    pub layout: RetrievalLayout,
}

impl LocalStoreConfig {
    /// Configuration using the given layout.
    pub fn with_layout(layout: RetrievalLayout) -> Self {
        Self { layout }
    }
}

/// Retrieval state of a stored chunk, independent of layout.
#[derive(Debug, Clone)]
pub(crate) struct Stored {
    pub(crate) data: Bytes,
    pub(crate) store_timestamp: u64,
    /// `None` in the split layout until an access is recorded.
    pub(crate) access_timestamp: Option<u64>,
}

impl Stored {
    /// Timestamp the gc index is keyed by for this chunk.
    pub(crate) fn gc_timestamp(&self) -> u64 {
        self.access_timestamp.unwrap_or(self.store_timestamp)
    }

    pub(crate) fn into_chunk(self, address: ChunkAddress) -> Chunk {
        Chunk::new(address, self.data)
    }
}

pub(crate) struct Inner<S> {
    pub(crate) store: S,
    pub(crate) layout: RetrievalLayout,
    pub(crate) clock: Arc<dyn Clock>,
    /// Serializes read-modify-write sequences so batches never interleave.
    pub(crate) batch_lock: Mutex<()>,
    closed: AtomicBool,
    pub(crate) metrics: LocalStoreMetrics,
}

/// Chunk store maintaining the retrieval, pull, push and gc indexes.
///
/// Cheap to clone; clones share the same underlying store.
pub struct LocalStore<S> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S> Clone for LocalStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for LocalStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("layout", &self.inner.layout)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S: IndexStore> LocalStore<S> {
    /// Create a local store using the wall clock.
    pub fn new(store: S, config: LocalStoreConfig) -> Self {
        Self::with_clock(store, config, SystemClock)
    }

    /// Create a local store with a custom time source.
    pub fn with_clock(store: S, config: LocalStoreConfig, clock: impl Clock + 'static) -> Self {
        let metrics = LocalStoreMetrics::default();
        match SIZE.get(&store) {
            Ok(size) => {
                metrics.set_size(size);
                debug!(layout = %config.layout, size, "Opened local store");
            }
            Err(err) => warn!(layout = %config.layout, %err, "Opened local store with unreadable size"),
        }

        Self {
            inner: Arc::new(Inner {
                store,
                layout: config.layout,
                clock: Arc::new(clock),
                batch_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    /// Accessor performing operations in `mode`.
    pub fn accessor(&self, mode: Mode) -> Accessor<S> {
        Accessor::new(self.clone(), mode)
    }

    /// Configured retrieval layout.
    pub fn layout(&self) -> RetrievalLayout {
        self.inner.layout
    }

    /// Number of chunks in the retrieval index.
    pub fn size(&self) -> LocalStoreResult<u64> {
        self.ensure_open()?;
        Ok(SIZE.get(&self.inner.store)?)
    }

    /// Stop serving requests. Every later operation fails with
    /// [`LocalStoreError::Closed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!("Closed local store");
        }
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> LocalStoreResult<()> {
        if self.is_closed() {
            return Err(LocalStoreError::Closed);
        }
        Ok(())
    }

    /// The retrieval data record for `address`.
    ///
    /// In the split layout the access timestamp is always zero here; use
    /// [`access_item`](Self::access_item) for it.
    pub fn retrieval_item(&self, address: &ChunkAddress) -> LocalStoreResult<IndexItem> {
        self.ensure_open()?;
        let key = AddressKey(*address);
        let item = IndexItem::new(*address);
        match self.inner.layout {
            RetrievalLayout::Composite => {
                let record = RETRIEVAL_COMPOSITE
                    .get(&self.inner.store, key)?
                    .ok_or(LocalStoreError::NotFound(*address))?;
                Ok(item
                    .with_data(record.data.into())
                    .with_store_timestamp(record.store_timestamp)
                    .with_access_timestamp(record.access_timestamp))
            }
            RetrievalLayout::Split => {
                let record = RETRIEVAL_DATA
                    .get(&self.inner.store, key)?
                    .ok_or(LocalStoreError::NotFound(*address))?;
                Ok(item
                    .with_data(record.data.into())
                    .with_store_timestamp(record.store_timestamp))
            }
        }
    }

    /// The access record for `address`.
    ///
    /// The split layout reports [`LocalStoreError::NotFound`] until an
    /// access-tracking operation has run for the chunk.
    pub fn access_item(&self, address: &ChunkAddress) -> LocalStoreResult<IndexItem> {
        self.ensure_open()?;
        let key = AddressKey(*address);
        let access_timestamp = match self.inner.layout {
            RetrievalLayout::Composite => RETRIEVAL_COMPOSITE
                .get(&self.inner.store, key)?
                .map(|record| record.access_timestamp),
            RetrievalLayout::Split => RETRIEVAL_ACCESS.get(&self.inner.store, key)?,
        };
        access_timestamp
            .map(|timestamp| IndexItem::new(*address).with_access_timestamp(timestamp))
            .ok_or(LocalStoreError::NotFound(*address))
    }

    /// Visit the pull index in arrival order, starting at `start`
    /// (inclusive) if given.
    pub fn iterate_pull<F>(&self, start: Option<(u64, ChunkAddress)>, visit: F) -> LocalStoreResult<()>
    where
        F: FnMut(IndexItem) -> ControlFlow<()>,
    {
        self.iterate_by_store_timestamp(&PULL, start, visit)
    }

    /// Visit the push index in arrival order, starting at `start`
    /// (inclusive) if given.
    pub fn iterate_push<F>(&self, start: Option<(u64, ChunkAddress)>, visit: F) -> LocalStoreResult<()>
    where
        F: FnMut(IndexItem) -> ControlFlow<()>,
    {
        self.iterate_by_store_timestamp(&PUSH, start, visit)
    }

    fn iterate_by_store_timestamp<F>(
        &self,
        index: &Index<TimestampKey, ()>,
        start: Option<(u64, ChunkAddress)>,
        mut visit: F,
    ) -> LocalStoreResult<()>
    where
        F: FnMut(IndexItem) -> ControlFlow<()>,
    {
        self.ensure_open()?;
        let start = start.map(|(timestamp, address)| TimestampKey::new(timestamp, address));
        index.iterate(&self.inner.store, start, |key, ()| {
            Ok(visit(
                IndexItem::new(key.address).with_store_timestamp(key.timestamp),
            ))
        })?;
        Ok(())
    }

    /// Visit the gc index, least recently accessed first.
    pub fn iterate_gc<F>(&self, mut visit: F) -> LocalStoreResult<()>
    where
        F: FnMut(IndexItem) -> ControlFlow<()>,
    {
        self.ensure_open()?;
        GC.iterate(&self.inner.store, None, |key, record| {
            Ok(visit(
                IndexItem::new(key.address)
                    .with_store_timestamp(record.store_timestamp)
                    .with_access_timestamp(key.timestamp),
            ))
        })?;
        Ok(())
    }

    /// Up to `limit` eviction candidates, least recently accessed first.
    pub fn gc_candidates(&self, limit: usize) -> LocalStoreResult<Vec<IndexItem>> {
        let mut candidates = Vec::with_capacity(limit.min(1024));
        if limit == 0 {
            return Ok(candidates);
        }
        self.iterate_gc(|item| {
            candidates.push(item);
            if candidates.len() >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(candidates)
    }

    /// Number of entries in the gc index.
    pub fn gc_size(&self) -> LocalStoreResult<usize> {
        self.ensure_open()?;
        Ok(GC.count(&self.inner.store)?)
    }

    /// Load the retrieval state of `address` in the configured layout.
    pub(crate) fn load(&self, address: ChunkAddress) -> Result<Option<Stored>, DatabaseError> {
        let key = AddressKey(address);
        match self.inner.layout {
            RetrievalLayout::Composite => Ok(RETRIEVAL_COMPOSITE
                .get(&self.inner.store, key)?
                .map(|record| Stored {
                    data: record.data.into(),
                    store_timestamp: record.store_timestamp,
                    access_timestamp: Some(record.access_timestamp),
                })),
            RetrievalLayout::Split => {
                let Some(record) = RETRIEVAL_DATA.get(&self.inner.store, key)? else {
                    return Ok(None);
                };
                let access_timestamp = RETRIEVAL_ACCESS.get(&self.inner.store, key)?;
                Ok(Some(Stored {
                    data: record.data.into(),
                    store_timestamp: record.store_timestamp,
                    access_timestamp,
                }))
            }
        }
    }

    /// Queue the retrieval records of a newly stored chunk.
    ///
    /// The composite layout always carries an access timestamp and falls
    /// back to the store timestamp.
    pub(crate) fn insert_retrieval(
        &self,
        batch: &mut Batch,
        address: ChunkAddress,
        stored: &Stored,
    ) -> Result<(), DatabaseError> {
        let key = AddressKey(address);
        match self.inner.layout {
            RetrievalLayout::Composite => RETRIEVAL_COMPOSITE.put_in_batch(
                batch,
                key,
                &CompositeRecord {
                    data: stored.data.to_vec(),
                    store_timestamp: stored.store_timestamp,
                    access_timestamp: stored.gc_timestamp(),
                },
            ),
            RetrievalLayout::Split => {
                RETRIEVAL_DATA.put_in_batch(
                    batch,
                    key,
                    &DataRecord {
                        data: stored.data.to_vec(),
                        store_timestamp: stored.store_timestamp,
                    },
                )?;
                if let Some(access_timestamp) = stored.access_timestamp {
                    RETRIEVAL_ACCESS.put_in_batch(batch, key, &access_timestamp)?;
                }
                Ok(())
            }
        }
    }

    /// Queue an access at `now`: the access record is updated and the gc
    /// entry moves from the previous access time to `now`.
    pub(crate) fn record_access(
        &self,
        batch: &mut Batch,
        address: ChunkAddress,
        stored: &Stored,
        now: u64,
    ) -> Result<(), DatabaseError> {
        GC.delete_in_batch(batch, TimestampKey::new(stored.gc_timestamp(), address));
        GC.put_in_batch(
            batch,
            TimestampKey::new(now, address),
            &GcRecord {
                store_timestamp: stored.store_timestamp,
            },
        )?;

        let key = AddressKey(address);
        match self.inner.layout {
            RetrievalLayout::Composite => RETRIEVAL_COMPOSITE.put_in_batch(
                batch,
                key,
                &CompositeRecord {
                    data: stored.data.to_vec(),
                    store_timestamp: stored.store_timestamp,
                    access_timestamp: now,
                },
            ),
            RetrievalLayout::Split => RETRIEVAL_ACCESS.put_in_batch(batch, key, &now),
        }
    }

    /// Queue removal of the retrieval records of `address`.
    pub(crate) fn delete_retrieval(&self, batch: &mut Batch, address: ChunkAddress) {
        let key = AddressKey(address);
        match self.inner.layout {
            RetrievalLayout::Composite => RETRIEVAL_COMPOSITE.delete_in_batch(batch, key),
            RetrievalLayout::Split => {
                RETRIEVAL_DATA.delete_in_batch(batch, key);
                RETRIEVAL_ACCESS.delete_in_batch(batch, key);
            }
        }
    }
}
