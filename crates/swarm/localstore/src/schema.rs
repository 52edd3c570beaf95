//! Index schema: key encodings, stored records and index definitions.
//!
//! All timestamps are big-endian in keys so byte order equals time order.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use vertex_storage::{DatabaseError, Decode, Encode, Index, Uint64Field};
use vertex_swarm_primitives::{ADDRESS_LENGTH, ChunkAddress};

/// Key of indexes looked up by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct AddressKey(pub(crate) ChunkAddress);

impl Encode for AddressKey {
    type Encoded = [u8; ADDRESS_LENGTH];

    fn encode(self) -> Self::Encoded {
        *self.0.as_bytes()
    }
}

impl Decode for AddressKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        ChunkAddress::from_slice(value)
            .map(Self)
            .map_err(|_| DatabaseError::Decode)
    }
}

/// Key of indexes ordered by time, ties broken by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimestampKey {
    pub(crate) timestamp: u64,
    pub(crate) address: ChunkAddress,
}

impl TimestampKey {
    pub(crate) fn new(timestamp: u64, address: ChunkAddress) -> Self {
        Self { timestamp, address }
    }
}

impl Encode for TimestampKey {
    type Encoded = [u8; 8 + ADDRESS_LENGTH];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 8 + ADDRESS_LENGTH];
        out[..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..].copy_from_slice(self.address.as_bytes());
        out
    }
}

impl Decode for TimestampKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 8 + ADDRESS_LENGTH {
            return Err(DatabaseError::Decode);
        }
        let (timestamp, address) = value.split_at(8);
        let timestamp: [u8; 8] = timestamp.try_into().map_err(|_| DatabaseError::Decode)?;
        Ok(Self {
            timestamp: u64::from_be_bytes(timestamp),
            address: ChunkAddress::from_slice(address).map_err(|_| DatabaseError::Decode)?,
        })
    }
}

/// Composite retrieval record: data with both timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CompositeRecord {
    pub(crate) data: Vec<u8>,
    pub(crate) store_timestamp: u64,
    pub(crate) access_timestamp: u64,
}

/// Split-layout data record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DataRecord {
    pub(crate) data: Vec<u8>,
    pub(crate) store_timestamp: u64,
}

/// Value of a gc index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct GcRecord {
    pub(crate) store_timestamp: u64,
}

pub(crate) const RETRIEVAL_COMPOSITE: Index<AddressKey, CompositeRecord> =
    Index::new(1, "retrieval-composite");
pub(crate) const RETRIEVAL_DATA: Index<AddressKey, DataRecord> = Index::new(2, "retrieval-data");
pub(crate) const RETRIEVAL_ACCESS: Index<AddressKey, u64> = Index::new(3, "retrieval-access");
pub(crate) const PULL: Index<TimestampKey, ()> = Index::new(4, "pull");
pub(crate) const PUSH: Index<TimestampKey, ()> = Index::new(5, "push");
pub(crate) const GC: Index<TimestampKey, GcRecord> = Index::new(6, "gc");
pub(crate) const SIZE: Uint64Field = Uint64Field::new("size");

/// A chunk as seen through one index.
///
/// Fields an index does not hold are left empty: `data` is `None` and
/// timestamps are zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexItem {
    /// Chunk address.
    pub address: ChunkAddress,
    /// Chunk payload, for retrieval data records.
    pub data: Option<Bytes>,
    /// When the chunk was first stored, in nanoseconds.
    pub store_timestamp: u64,
    /// When the chunk was last accessed, in nanoseconds.
    pub access_timestamp: u64,
}

impl IndexItem {
    pub(crate) fn new(address: ChunkAddress) -> Self {
        Self {
            address,
            data: None,
            store_timestamp: 0,
            access_timestamp: 0,
        }
    }

    pub(crate) fn with_data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }

    pub(crate) fn with_store_timestamp(mut self, timestamp: u64) -> Self {
        self.store_timestamp = timestamp;
        self
    }

    pub(crate) fn with_access_timestamp(mut self, timestamp: u64) -> Self {
        self.access_timestamp = timestamp;
        self
    }
}
