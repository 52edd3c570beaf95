//! In-memory [`IndexStore`] backed by a `BTreeMap`.

use std::collections::BTreeMap;
use std::ops::{Bound, ControlFlow};

use parking_lot::RwLock;

use crate::{Batch, BatchOp, DatabaseError, IndexStore};

/// Simple in-memory index store.
///
/// Batches are applied under a single write lock, which makes them atomic
/// with respect to readers and iterators.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryIndexStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of keys across all indexes.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexStore for MemoryIndexStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> Result<bool, DatabaseError> {
        Ok(self.entries.read().contains_key(key))
    }

    fn write(&self, batch: Batch) -> Result<(), DatabaseError> {
        let mut entries = self.entries.write();
        for op in batch {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iterate_from(
        &self,
        start: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>, DatabaseError>,
    ) -> Result<(), DatabaseError> {
        let entries = self.entries.read();
        for (key, value) in entries.range::<[u8], _>((Bound::Included(start), Bound::Unbounded)) {
            if visit(key, value)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_applies_in_order() {
        let store = MemoryIndexStore::new();

        let mut batch = Batch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.delete(b"a".to_vec());
        batch.put(b"a".to_vec(), b"2".to_vec());
        store.write(batch).unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_iterate_from_is_ordered() {
        let store = MemoryIndexStore::new();

        let mut batch = Batch::new();
        for key in [b"c", b"a", b"d", b"b"] {
            batch.put(key.to_vec(), Vec::new());
        }
        store.write(batch).unwrap();

        let mut seen = Vec::new();
        store
            .iterate_from(b"b", &mut |key, _| {
                seen.push(key.to_vec());
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();

        assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn test_iterate_stops_on_break() {
        let store = MemoryIndexStore::new();

        let mut batch = Batch::new();
        for i in 0u8..10 {
            batch.put(vec![i], Vec::new());
        }
        store.write(batch).unwrap();

        let mut count = 0;
        store
            .iterate_from(&[], &mut |_, _| {
                count += 1;
                Ok(if count == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            })
            .unwrap();

        assert_eq!(count, 3);
    }
}
