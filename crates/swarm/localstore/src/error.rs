//! Local store error types.

use vertex_storage::DatabaseError;
use vertex_swarm_api::SwarmError;
use vertex_swarm_primitives::ChunkAddress;

/// Errors from local store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalStoreError {
    /// No record for the address in the requested index.
    #[error("chunk not found: {0}")]
    NotFound(ChunkAddress),

    /// The underlying index store failed.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// The store was closed.
    #[error("local store is closed")]
    Closed,
}

impl LocalStoreError {
    /// True for [`LocalStoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, LocalStoreError::NotFound(_))
    }
}

impl From<LocalStoreError> for SwarmError {
    fn from(err: LocalStoreError) -> Self {
        match err {
            LocalStoreError::NotFound(address) => SwarmError::ChunkNotFound { address },
            other => SwarmError::Storage {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for local store operations.
pub type LocalStoreResult<T> = Result<T, LocalStoreError>;
