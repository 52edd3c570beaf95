//! Local chunk store with mode-aware index maintenance.
//!
//! A [`LocalStore`] keeps every chunk under a fixed set of indexes over an
//! ordered key-value [`IndexStore`](vertex_storage::IndexStore):
//!
//! - **retrieval**: answers `get`; either one composite record per chunk or
//!   separate data and access records (see [`RetrievalLayout`])
//! - **pull**: `(store timestamp, address)`, arrival order for pull sync
//! - **push**: `(store timestamp, address)`, chunks still to be pushed
//! - **gc**: `(access timestamp, address)`, least recently accessed first
//! - **size**: number of chunks in the retrieval index
//!
//! Which indexes an operation touches is selected by the [`Mode`] of the
//! [`Accessor`] used to perform it. Every mode transition is written as one
//! atomic batch.

mod accessor;
mod args;
mod clock;
mod error;
mod metrics;
mod mode;
mod schema;
mod store;

pub use accessor::Accessor;
pub use args::LocalStoreArgs;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LocalStoreError, LocalStoreResult};
pub use mode::Mode;
pub use schema::IndexItem;
pub use store::{LocalStore, LocalStoreConfig, RetrievalLayout};
