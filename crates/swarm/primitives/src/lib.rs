//! Core primitive types for Ethereum Swarm chunk storage.
//!
//! This crate provides the chunk and address types shared by the storage
//! crates, kept separate to avoid circular dependencies.

use core::fmt;

use alloy_primitives::{B256, keccak256};
use bytes::Bytes;

/// Length in bytes of a chunk address.
pub const ADDRESS_LENGTH: usize = 32;

/// Maximum payload size of a content chunk.
pub const CHUNK_SIZE: usize = 4096;

/// Errors from constructing primitive types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrimitiveError {
    /// A byte slice of the wrong length was used as an address.
    #[error("invalid chunk address length: expected {ADDRESS_LENGTH}, got {0}")]
    InvalidAddressLength(usize),
}

/// Content-derived identity of a chunk.
///
/// Ordering is byte-wise, which is also the order used inside index keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkAddress(B256);

impl ChunkAddress {
    /// The all-zero address.
    pub const ZERO: Self = Self(B256::ZERO);

    /// Wrap raw address bytes.
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(B256::new(bytes))
    }

    /// Parse an address from a slice of exactly [`ADDRESS_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PrimitiveError> {
        let bytes: [u8; ADDRESS_LENGTH] = bytes
            .try_into()
            .map_err(|_| PrimitiveError::InvalidAddressLength(bytes.len()))?;
        Ok(Self::new(bytes))
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0.0
    }

    /// Underlying 256-bit digest.
    pub fn as_b256(&self) -> &B256 {
        &self.0
    }
}

impl From<B256> for ChunkAddress {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl From<[u8; ADDRESS_LENGTH]> for ChunkAddress {
    fn from(value: [u8; ADDRESS_LENGTH]) -> Self {
        Self::new(value)
    }
}

impl AsRef<[u8]> for ChunkAddress {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Display for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ChunkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkAddress({})", self.0)
    }
}

/// An immutable content-addressed chunk.
///
/// The address is trusted: stores never verify that it was derived from
/// the data. Use [`Chunk::from_content`] to derive it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Chunk {
    address: ChunkAddress,
    data: Bytes,
}

impl Chunk {
    /// Create a chunk from an address and its payload.
    pub fn new(address: ChunkAddress, data: impl Into<Bytes>) -> Self {
        Self {
            address,
            data: data.into(),
        }
    }

    /// Create a chunk whose address is the keccak256 digest of `data`.
    pub fn from_content(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            address: ChunkAddress(keccak256(&data)),
            data,
        }
    }

    /// The chunk address.
    pub fn address(&self) -> &ChunkAddress {
        &self.address
    }

    /// The chunk payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Split into address and payload.
    pub fn into_parts(self) -> (ChunkAddress, Bytes) {
        (self.address, self.data)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("address", &self.address)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Helpers for generating chunks in tests.
#[cfg(feature = "test-utils")]
pub mod test_utils {
    use rand::RngCore;

    use super::{CHUNK_SIZE, Chunk};

    /// A content-addressed chunk with [`CHUNK_SIZE`] random bytes.
    pub fn random_chunk() -> Chunk {
        let mut data = vec![0u8; CHUNK_SIZE];
        rand::rng().fill_bytes(&mut data);
        Chunk::from_content(data)
    }

    /// `n` distinct random chunks.
    pub fn random_chunks(n: usize) -> Vec<Chunk> {
        (0..n).map(|_| random_chunk()).collect()
    }
}
