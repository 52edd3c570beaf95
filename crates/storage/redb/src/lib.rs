//! redb-based [`IndexStore`] backend.
//!
//! All indexes share one redb table; each [`Batch`] is committed in its own
//! write transaction, which gives the atomicity the chunk indexes rely on.

use std::ops::ControlFlow;
use std::path::Path;

use redb::{Database, TableDefinition};
use tracing::debug;
use vertex_storage::{Batch, BatchOp, DatabaseError, IndexStore};

/// Table holding every index entry.
/// Key: index id followed by the encoded index key
/// Value: encoded index value
const ENTRIES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

fn backend(err: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Backend(err.to_string())
}

/// redb-based index store.
///
/// Uses redb for ACID-compliant persistent storage of index entries.
/// Thread-safe for concurrent reads and writes.
pub struct RedbIndexStore {
    db: Database,
}

impl RedbIndexStore {
    /// Open or create an index store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let db = Database::create(path).map_err(backend)?;

        // Ensure the entries table exists so readers never see a missing table.
        let write_txn = db.begin_write().map_err(backend)?;
        {
            let _ = write_txn.open_table(ENTRIES_TABLE).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;

        debug!("Opened redb index store");
        Ok(Self { db })
    }
}

impl std::fmt::Debug for RedbIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbIndexStore").finish_non_exhaustive()
    }
}

impl IndexStore for RedbIndexStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ENTRIES_TABLE).map_err(backend)?;
        Ok(table.get(key).map_err(backend)?.map(|value| value.value().to_vec()))
    }

    fn write(&self, batch: Batch) -> Result<(), DatabaseError> {
        if batch.is_empty() {
            return Ok(());
        }
        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE).map_err(backend)?;
            for op in batch {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_slice(), value.as_slice()).map_err(backend)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(backend)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(backend)
    }

    fn iterate_from(
        &self,
        start: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>, DatabaseError>,
    ) -> Result<(), DatabaseError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(ENTRIES_TABLE).map_err(backend)?;

        for entry in table.range::<&[u8]>(start..).map_err(backend)? {
            let (key, value) = entry.map_err(backend)?;
            if visit(key.value(), value.value())?.is_break() {
                break;
            }
        }

        Ok(())
    }
}
