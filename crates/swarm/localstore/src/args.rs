//! Local store CLI arguments.

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{LocalStoreConfig, RetrievalLayout};

/// Local store configuration arguments.
#[derive(Debug, Args, Clone, Default, Serialize, Deserialize)]
#[command(next_help_heading = "Local Store")]
#[serde(default)]
pub struct LocalStoreArgs {
    /// Keep data, store and access timestamps in one retrieval record
    /// instead of separate data and access records.
    #[arg(long = "localstore.retrieval-composite-index")]
    pub retrieval_composite_index: bool,
}

impl LocalStoreArgs {
    /// The retrieval layout selected by these arguments.
    pub fn layout(&self) -> RetrievalLayout {
        if self.retrieval_composite_index {
            RetrievalLayout::Composite
        } else {
            RetrievalLayout::Split
        }
    }
}

impl From<&LocalStoreArgs> for LocalStoreConfig {
    fn from(args: &LocalStoreArgs) -> Self {
        LocalStoreConfig::with_layout(args.layout())
    }
}
