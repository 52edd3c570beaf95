//! Error types for Swarm storage operations.
//!
//! Each error variant contains typed data (not strings) where callers are
//! expected to branch on it.

use std::string::String;
use vertex_swarm_primitives::ChunkAddress;

/// Error type for chunk store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwarmError {
    /// Chunk not present in the store.
    #[error("chunk not found: {address}")]
    ChunkNotFound {
        /// The address of the chunk that wasn't found.
        address: ChunkAddress,
    },

    /// Storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// The caller stopped waiting for a chunk before it arrived.
    #[error(
        "request for chunk {address} {reason}, last fetch status: {}",
        .status.as_ref().map_or_else(|| "none".to_string(), ToString::to_string)
    )]
    Cancelled {
        /// The address that was being fetched.
        address: ChunkAddress,
        /// Why the request stopped waiting.
        reason: CancelReason,
        /// The last failure recorded by the fetch, if any.
        status: Option<FetchError>,
    },
}

impl SwarmError {
    /// True for [`SwarmError::ChunkNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, SwarmError::ChunkNotFound { .. })
    }
}

/// Failure of a single remote retrieval attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The network layer reported a failure.
    #[error("retrieve failed: {reason}")]
    Retrieve {
        /// Description of the failure.
        reason: String,
    },

    /// No result within the search timeout.
    #[error("search timed out")]
    SearchTimeout,
}

impl FetchError {
    /// Build a [`FetchError::Retrieve`] from any displayable error.
    pub fn retrieve(reason: impl ToString) -> Self {
        FetchError::Retrieve {
            reason: reason.to_string(),
        }
    }
}

/// Why a waiting request gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum CancelReason {
    /// The caller cancelled the request.
    #[strum(serialize = "cancelled")]
    Cancelled,
    /// The request deadline passed.
    #[strum(serialize = "deadline exceeded")]
    DeadlineExceeded,
    /// The store shut down.
    #[strum(serialize = "aborted by shutdown")]
    Shutdown,
}

/// Result type for chunk store operations.
pub type SwarmResult<T> = core::result::Result<T, SwarmError>;
