//! Swarm API - storage contracts for Ethereum Swarm chunk stores.
//!
//! This crate defines the minimal abstractions shared between the local
//! index store and the network-facing fetch layer.
//!
//! # Core Concepts
//!
//! - [`ChunkStore`] - Put/get/close contract over any chunk persistence layer
//! - [`SwarmError`] - The errors callers of a chunk store can observe
//! - [`FetchError`] - Status of a failed remote retrieval attempt
//! - [`CancelReason`] - Why a waiting request stopped waiting

#![warn(missing_docs)]

mod error;
mod store;

pub use error::*;
pub use store::*;

// Re-export chunk types for convenience
pub use vertex_swarm_primitives::{Chunk, ChunkAddress};
