//! Atomic write batches.

/// A single operation inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put {
        /// Raw key.
        key: Vec<u8>,
        /// Raw value.
        value: Vec<u8>,
    },
    /// Remove a key if present.
    Delete {
        /// Raw key.
        key: Vec<u8>,
    },
}

/// Ordered list of mutations applied by [`IndexStore::write`](crate::IndexStore::write)
/// as one unit.
///
/// Operations are applied in insertion order, so deleting and re-inserting
/// the same key within one batch leaves the key present.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Queue a removal.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Borrow the queued operations.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

impl IntoIterator for Batch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}
