//! Mode-bound access to a [`LocalStore`].

use futures::FutureExt;
use futures::future;
use tracing::trace;
use vertex_storage::{Batch, IndexStore};
use vertex_swarm_api::{ChunkStore, StoreWait, SwarmResult};
use vertex_swarm_primitives::{Chunk, ChunkAddress};

use crate::schema::{GC, GcRecord, PULL, PUSH, SIZE, TimestampKey};
use crate::store::Stored;
use crate::{LocalStore, LocalStoreError, LocalStoreResult, Mode};

/// Performs `put` and `get` with the index effects of one [`Mode`].
#[derive(Debug)]
pub struct Accessor<S> {
    db: LocalStore<S>,
    mode: Mode,
}

impl<S> Clone for Accessor<S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            mode: self.mode,
        }
    }
}

impl<S: IndexStore> Accessor<S> {
    pub(crate) fn new(db: LocalStore<S>, mode: Mode) -> Self {
        Self { db, mode }
    }

    /// The mode of this accessor.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Apply this mode's write profile for `chunk`.
    ///
    /// Returns `true` if the chunk data was newly added to the retrieval
    /// index.
    pub fn put(&self, chunk: &Chunk) -> LocalStoreResult<bool> {
        self.db.ensure_open()?;
        self.db.inner.metrics.record_put(self.mode);

        let inner = &self.db.inner;
        let address = *chunk.address();

        let _guard = inner.batch_lock.lock();
        let now = inner.clock.now();
        let stored = self.db.load(address)?;
        let mut size = SIZE.get(&inner.store)?;
        let mut batch = Batch::new();

        let added = match (self.mode, stored) {
            (Mode::Syncing | Mode::Upload, None) => {
                let stored = Stored {
                    data: chunk.data().clone(),
                    store_timestamp: now,
                    access_timestamp: None,
                };
                self.db.insert_retrieval(&mut batch, address, &stored)?;
                self.index_arrival(&mut batch, address, now)?;
                size += 1;
                true
            }
            (Mode::Syncing | Mode::Upload, Some(stored)) => {
                // data and store timestamp stay; secondary entries are ensured
                self.index_arrival(&mut batch, address, stored.store_timestamp)?;
                false
            }
            (Mode::Request, None) => {
                let stored = Stored {
                    data: chunk.data().clone(),
                    store_timestamp: now,
                    access_timestamp: Some(now),
                };
                self.db.insert_retrieval(&mut batch, address, &stored)?;
                GC.put_in_batch(
                    &mut batch,
                    TimestampKey::new(now, address),
                    &GcRecord {
                        store_timestamp: now,
                    },
                )?;
                size += 1;
                true
            }
            (Mode::Request | Mode::Access, Some(stored)) => {
                self.db.record_access(&mut batch, address, &stored, now)?;
                false
            }
            (Mode::Synced, Some(stored)) => {
                PUSH.delete_in_batch(&mut batch, TimestampKey::new(stored.store_timestamp, address));
                GC.put_in_batch(
                    &mut batch,
                    TimestampKey::new(stored.gc_timestamp(), address),
                    &GcRecord {
                        store_timestamp: stored.store_timestamp,
                    },
                )?;
                false
            }
            (Mode::Removal, Some(stored)) => {
                self.db.delete_retrieval(&mut batch, address);
                let key = TimestampKey::new(stored.store_timestamp, address);
                PULL.delete_in_batch(&mut batch, key);
                PUSH.delete_in_batch(&mut batch, key);
                GC.delete_in_batch(&mut batch, TimestampKey::new(stored.gc_timestamp(), address));
                size = size.saturating_sub(1);
                false
            }
            (Mode::Synced | Mode::Access | Mode::Removal, None) => {
                trace!(%address, mode = %self.mode, "Nothing to update for absent chunk");
                return Ok(false);
            }
        };

        SIZE.put_in_batch(&mut batch, size);
        inner.store.write(batch)?;
        inner.metrics.set_size(size);

        trace!(%address, mode = %self.mode, added, size, "Put chunk");
        Ok(added)
    }

    /// Pull entry for every arriving chunk, push entry for uploads.
    fn index_arrival(
        &self,
        batch: &mut Batch,
        address: ChunkAddress,
        store_timestamp: u64,
    ) -> LocalStoreResult<()> {
        let key = TimestampKey::new(store_timestamp, address);
        PULL.put_in_batch(batch, key, &())?;
        if self.mode == Mode::Upload {
            PUSH.put_in_batch(batch, key, &())?;
        }
        Ok(())
    }

    /// Read a chunk, recording an access if this mode tracks access.
    pub fn get(&self, address: &ChunkAddress) -> LocalStoreResult<Chunk> {
        self.db.ensure_open()?;
        let inner = &self.db.inner;
        inner.metrics.record_get(self.mode);

        if !self.mode.tracks_access() {
            return match self.db.load(*address)? {
                Some(stored) => Ok(stored.into_chunk(*address)),
                None => Err(self.not_found(address)),
            };
        }

        let _guard = inner.batch_lock.lock();
        let Some(stored) = self.db.load(*address)? else {
            return Err(self.not_found(address));
        };

        let now = inner.clock.now();
        let mut batch = Batch::new();
        self.db.record_access(&mut batch, *address, &stored, now)?;
        inner.store.write(batch)?;

        trace!(%address, mode = %self.mode, access_timestamp = now, "Recorded access");
        Ok(stored.into_chunk(*address))
    }

    fn not_found(&self, address: &ChunkAddress) -> LocalStoreError {
        self.db.inner.metrics.record_not_found();
        LocalStoreError::NotFound(*address)
    }
}

impl<S: IndexStore> ChunkStore for Accessor<S> {
    fn put(&self, chunk: Chunk) -> SwarmResult<Option<StoreWait>> {
        // batches are durable once written
        let added = Accessor::put(self, &chunk)?;
        Ok(added.then(|| future::ready(Ok(())).boxed()))
    }

    fn get(&self, address: &ChunkAddress) -> SwarmResult<Chunk> {
        Ok(Accessor::get(self, address)?)
    }

    fn close(&self) {
        self.db.close();
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use strum::IntoEnumIterator;
    use vertex_storage::MemoryIndexStore;
    use vertex_swarm_primitives::test_utils::random_chunk;

    use super::*;
    use crate::{LocalStoreConfig, ManualClock, RetrievalLayout};

    const LAYOUTS: [RetrievalLayout; 2] = [RetrievalLayout::Split, RetrievalLayout::Composite];

    fn new_store(layout: RetrievalLayout) -> (LocalStore<MemoryIndexStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = LocalStore::with_clock(
            MemoryIndexStore::new(),
            LocalStoreConfig::with_layout(layout),
            Arc::clone(&clock),
        );
        (store, clock)
    }

    fn pull_keys(db: &LocalStore<MemoryIndexStore>) -> Vec<(u64, ChunkAddress)> {
        let mut keys = Vec::new();
        db.iterate_pull(None, |item| {
            keys.push((item.store_timestamp, item.address));
            ControlFlow::Continue(())
        })
        .unwrap();
        keys
    }

    fn push_keys(db: &LocalStore<MemoryIndexStore>) -> Vec<(u64, ChunkAddress)> {
        let mut keys = Vec::new();
        db.iterate_push(None, |item| {
            keys.push((item.store_timestamp, item.address));
            ControlFlow::Continue(())
        })
        .unwrap();
        keys
    }

    fn gc_keys(db: &LocalStore<MemoryIndexStore>) -> Vec<(u64, ChunkAddress)> {
        let mut keys = Vec::new();
        db.iterate_gc(|item| {
            keys.push((item.access_timestamp, item.address));
            ControlFlow::Continue(())
        })
        .unwrap();
        keys
    }

    #[test]
    fn test_mode_syncing() {
        for layout in LAYOUTS {
            let (db, clock) = new_store(layout);
            clock.set(100);
            let chunk = random_chunk();

            assert!(db.accessor(Mode::Syncing).put(&chunk).unwrap());

            let item = db.retrieval_item(chunk.address()).unwrap();
            assert_eq!(item.data.as_ref(), Some(chunk.data()));
            assert_eq!(item.store_timestamp, 100);
            assert_eq!(pull_keys(&db), vec![(100, *chunk.address())]);
            assert!(push_keys(&db).is_empty());
            assert!(gc_keys(&db).is_empty());
            assert_eq!(db.size().unwrap(), 1);
        }
    }

    #[test]
    fn test_mode_upload() {
        for layout in LAYOUTS {
            let (db, clock) = new_store(layout);
            clock.set(200);
            let chunk = random_chunk();

            db.accessor(Mode::Upload).put(&chunk).unwrap();

            let item = db.retrieval_item(chunk.address()).unwrap();
            assert_eq!(item.store_timestamp, 200);
            assert_eq!(pull_keys(&db), vec![(200, *chunk.address())]);
            assert_eq!(push_keys(&db), vec![(200, *chunk.address())]);
            assert!(gc_keys(&db).is_empty());
            assert_eq!(db.size().unwrap(), 1);
        }
    }

    #[test]
    fn test_mode_request() {
        for layout in LAYOUTS {
            let (db, clock) = new_store(layout);
            clock.set(300);
            let chunk = random_chunk();

            db.accessor(Mode::Request).put(&chunk).unwrap();

            let item = db.retrieval_item(chunk.address()).unwrap();
            assert_eq!(item.store_timestamp, 300);
            assert_eq!(db.access_item(chunk.address()).unwrap().access_timestamp, 300);
            assert!(pull_keys(&db).is_empty());
            assert!(push_keys(&db).is_empty());
            assert_eq!(gc_keys(&db), vec![(300, *chunk.address())]);
            assert_eq!(db.size().unwrap(), 1);

            // already stored: access refreshed, no second count
            clock.set(400);
            assert!(!db.accessor(Mode::Request).put(&chunk).unwrap());
            assert_eq!(db.access_item(chunk.address()).unwrap().access_timestamp, 400);
            assert_eq!(gc_keys(&db), vec![(400, *chunk.address())]);
            assert_eq!(db.size().unwrap(), 1);
        }
    }

    #[test]
    fn test_mode_request_after_sync_keeps_size() {
        for layout in LAYOUTS {
            let (db, _) = new_store(layout);
            let chunk = random_chunk();

            db.accessor(Mode::Syncing).put(&chunk).unwrap();
            db.accessor(Mode::Request).put(&chunk).unwrap();

            assert_eq!(db.size().unwrap(), 1);
            assert_eq!(gc_keys(&db).len(), 1);
        }
    }

    #[test]
    fn test_mode_synced() {
        for layout in LAYOUTS {
            let (db, clock) = new_store(layout);
            clock.set(500);
            let chunk = random_chunk();

            db.accessor(Mode::Upload).put(&chunk).unwrap();
            clock.set(600);
            db.accessor(Mode::Synced).put(&chunk).unwrap();

            assert!(push_keys(&db).is_empty());
            assert_eq!(pull_keys(&db), vec![(500, *chunk.address())]);
            // never accessed, so keyed by the store timestamp
            assert_eq!(gc_keys(&db), vec![(500, *chunk.address())]);
            assert_eq!(db.size().unwrap(), 1);
        }
    }

    #[test]
    fn test_mode_synced_without_upload() {
        for layout in LAYOUTS {
            let (db, _) = new_store(layout);
            let chunk = random_chunk();

            assert!(!db.accessor(Mode::Synced).put(&chunk).unwrap());

            assert_matches!(
                db.accessor(Mode::Synced).get(chunk.address()),
                Err(LocalStoreError::NotFound(address)) if address == *chunk.address()
            );
            assert!(gc_keys(&db).is_empty());
            assert_eq!(db.size().unwrap(), 0);
        }
    }

    #[test]
    fn test_mode_access_rekeys_gc() {
        for layout in LAYOUTS {
            let (db, clock) = new_store(layout);
            clock.set(1_000);
            let chunk = random_chunk();
            db.accessor(Mode::Upload).put(&chunk).unwrap();

            clock.set(2_000);
            let got = db.accessor(Mode::Access).get(chunk.address()).unwrap();
            assert_eq!(got, chunk);
            assert_eq!(gc_keys(&db), vec![(2_000, *chunk.address())]);

            clock.set(3_000);
            db.accessor(Mode::Access).get(chunk.address()).unwrap();
            assert_eq!(gc_keys(&db), vec![(3_000, *chunk.address())]);
            assert_eq!(db.gc_size().unwrap(), 1);

            assert_eq!(db.access_item(chunk.address()).unwrap().access_timestamp, 3_000);
            assert_eq!(db.retrieval_item(chunk.address()).unwrap().store_timestamp, 1_000);
        }
    }

    #[test]
    fn test_mode_synced_get_records_access() {
        for layout in LAYOUTS {
            let (db, clock) = new_store(layout);
            let chunk = random_chunk();
            db.accessor(Mode::Upload).put(&chunk).unwrap();
            db.accessor(Mode::Synced).put(&chunk).unwrap();

            clock.set(9_000);
            db.accessor(Mode::Synced).get(chunk.address()).unwrap();

            assert_eq!(gc_keys(&db), vec![(9_000, *chunk.address())]);
        }
    }

    #[test]
    fn test_mode_access_put_without_chunk_is_noop() {
        let (db, _) = new_store(RetrievalLayout::Split);
        let chunk = random_chunk();

        assert!(!db.accessor(Mode::Access).put(&chunk).unwrap());
        assert_matches!(db.accessor(Mode::Upload).get(chunk.address()), Err(LocalStoreError::NotFound(_)));
        assert!(gc_keys(&db).is_empty());
    }

    #[test]
    fn test_only_arrival_modes_store_absent_chunks() {
        for layout in LAYOUTS {
            for mode in Mode::iter() {
                let (db, _) = new_store(layout);
                let chunk = random_chunk();

                let added = db.accessor(mode).put(&chunk).unwrap();
                let arrival = matches!(mode, Mode::Syncing | Mode::Upload | Mode::Request);

                assert_eq!(added, arrival, "{mode} in {layout:?}");
                assert_eq!(db.size().unwrap(), u64::from(arrival), "{mode} in {layout:?}");
                assert_eq!(db.retrieval_item(chunk.address()).is_ok(), arrival, "{mode} in {layout:?}");
            }
        }
    }

    #[test]
    fn test_mode_removal() {
        for layout in LAYOUTS {
            let (db, clock) = new_store(layout);
            let chunk = random_chunk();

            db.accessor(Mode::Upload).put(&chunk).unwrap();
            clock.advance(10);
            db.accessor(Mode::Access).get(chunk.address()).unwrap();
            assert_eq!(db.size().unwrap(), 1);

            db.accessor(Mode::Removal).put(&chunk).unwrap();

            for mode in [Mode::Syncing, Mode::Upload, Mode::Request, Mode::Synced, Mode::Access] {
                assert_matches!(
                    db.accessor(mode).get(chunk.address()),
                    Err(LocalStoreError::NotFound(_))
                );
            }
            assert_matches!(db.retrieval_item(chunk.address()), Err(LocalStoreError::NotFound(_)));
            assert_matches!(db.access_item(chunk.address()), Err(LocalStoreError::NotFound(_)));
            assert!(pull_keys(&db).is_empty());
            assert!(push_keys(&db).is_empty());
            assert!(gc_keys(&db).is_empty());
            assert_eq!(db.size().unwrap(), 0);

            // removing again does not underflow
            db.accessor(Mode::Removal).put(&chunk).unwrap();
            assert_eq!(db.size().unwrap(), 0);
        }
    }

    #[test]
    fn test_upload_is_idempotent() {
        for layout in LAYOUTS {
            let (db, clock) = new_store(layout);
            let chunk = random_chunk();

            clock.set(10);
            assert!(db.accessor(Mode::Upload).put(&chunk).unwrap());
            clock.set(20);
            assert!(!db.accessor(Mode::Upload).put(&chunk).unwrap());

            assert_eq!(db.retrieval_item(chunk.address()).unwrap().store_timestamp, 10);
            assert_eq!(pull_keys(&db), vec![(10, *chunk.address())]);
            assert_eq!(db.size().unwrap(), 1);
        }
    }

    #[test]
    fn test_upload_restores_push_entry() {
        let (db, _) = new_store(RetrievalLayout::Split);
        let chunk = random_chunk();

        db.accessor(Mode::Syncing).put(&chunk).unwrap();
        assert!(push_keys(&db).is_empty());

        db.accessor(Mode::Upload).put(&chunk).unwrap();
        assert_eq!(push_keys(&db).len(), 1);
        assert_eq!(db.size().unwrap(), 1);
    }

    #[test]
    fn test_split_access_item_not_found_before_access() {
        let (split, _) = new_store(RetrievalLayout::Split);
        let (composite, _) = new_store(RetrievalLayout::Composite);
        let chunk = random_chunk();

        split.accessor(Mode::Upload).put(&chunk).unwrap();
        composite.accessor(Mode::Upload).put(&chunk).unwrap();

        assert_matches!(split.access_item(chunk.address()), Err(LocalStoreError::NotFound(_)));
        assert_eq!(composite.access_item(chunk.address()).unwrap().access_timestamp, 1_000);

        split.accessor(Mode::Access).get(chunk.address()).unwrap();
        assert_eq!(split.access_item(chunk.address()).unwrap().access_timestamp, 1_000);
    }

    #[test]
    fn test_layouts_are_equivalent() {
        let (split, split_clock) = new_store(RetrievalLayout::Split);
        let (composite, composite_clock) = new_store(RetrievalLayout::Composite);
        let chunks: Vec<_> = (0..4).map(|_| random_chunk()).collect();

        let steps = [
            (Mode::Upload, 0),
            (Mode::Syncing, 1),
            (Mode::Request, 2),
            (Mode::Synced, 0),
            (Mode::Access, 1),
            (Mode::Removal, 2),
            (Mode::Upload, 3),
        ];

        for (i, (mode, index)) in steps.into_iter().enumerate() {
            let now = 100 * (i as u64 + 1);
            split_clock.set(now);
            composite_clock.set(now);

            let chunk = &chunks[index];
            assert_eq!(
                split.accessor(mode).put(chunk).unwrap(),
                composite.accessor(mode).put(chunk).unwrap()
            );
            assert_eq!(
                split.accessor(Mode::Access).get(chunk.address()),
                composite.accessor(Mode::Access).get(chunk.address())
            );
        }

        assert_eq!(split.size().unwrap(), composite.size().unwrap());
        assert_eq!(pull_keys(&split), pull_keys(&composite));
        assert_eq!(push_keys(&split), push_keys(&composite));
        assert_eq!(gc_keys(&split), gc_keys(&composite));
    }

    #[test]
    fn test_chunk_store_put_reports_new_chunks() {
        let (db, _) = new_store(RetrievalLayout::Split);
        let store = db.accessor(Mode::Upload);
        let chunk = random_chunk();

        let wait = ChunkStore::put(&store, chunk.clone()).unwrap();
        assert!(wait.is_some());
        assert!(ChunkStore::put(&store, chunk.clone()).unwrap().is_none());
        assert_eq!(ChunkStore::get(&store, chunk.address()).unwrap(), chunk);

        let missing = random_chunk();
        assert_matches!(
            ChunkStore::get(&store, missing.address()),
            Err(vertex_swarm_api::SwarmError::ChunkNotFound { .. })
        );
    }

    fn data_mode() -> impl Strategy<Value = Mode> {
        prop_oneof![Just(Mode::Syncing), Just(Mode::Upload), Just(Mode::Request)]
    }

    proptest! {
        #[test]
        fn prop_put_then_get_returns_data(
            data in prop::collection::vec(any::<u8>(), 1..4096),
            mode in data_mode(),
            composite in any::<bool>(),
        ) {
            let layout = if composite { RetrievalLayout::Composite } else { RetrievalLayout::Split };
            let (db, _) = new_store(layout);
            let chunk = Chunk::from_content(data);

            db.accessor(mode).put(&chunk).unwrap();
            let got = db.accessor(mode).get(chunk.address()).unwrap();

            prop_assert_eq!(got.data(), chunk.data());
            prop_assert_eq!(db.size().unwrap(), 1);
        }
    }
}
