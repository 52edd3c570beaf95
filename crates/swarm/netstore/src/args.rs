//! NetStore CLI arguments and configuration.

use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

/// Default number of fetchers kept in the cache.
pub const DEFAULT_FETCHER_CACHE_CAPACITY: usize = 5_000_000;

/// Default time a single retrieve attempt may take.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay before retrying a retrieve that failed immediately.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Runtime configuration of a [`NetStore`](crate::NetStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetStoreConfig {
    /// Fetchers kept before idle ones are evicted.
    pub fetcher_cache_capacity: usize,
    /// Time after which an unanswered retrieve attempt counts as failed.
    pub search_timeout: Duration,
    /// Delay between an immediate retrieve error and the next attempt.
    pub retry_backoff: Duration,
}

impl Default for NetStoreConfig {
    fn default() -> Self {
        Self {
            fetcher_cache_capacity: DEFAULT_FETCHER_CACHE_CAPACITY,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// NetStore configuration arguments.
#[derive(Debug, Args, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Net Store")]
#[serde(default)]
pub struct NetStoreArgs {
    /// Maximum number of cached fetchers.
    #[arg(long = "netstore.fetcher-cache-capacity", default_value_t = DEFAULT_FETCHER_CACHE_CAPACITY)]
    pub fetcher_cache_capacity: usize,

    /// Search timeout per retrieve attempt, in seconds.
    #[arg(long = "netstore.search-timeout", default_value_t = DEFAULT_SEARCH_TIMEOUT.as_secs())]
    pub search_timeout: u64,

    /// Backoff after an immediate retrieve error, in milliseconds.
    #[arg(long = "netstore.retry-backoff-ms", default_value_t = 100)]
    pub retry_backoff_ms: u64,
}

impl Default for NetStoreArgs {
    fn default() -> Self {
        Self {
            fetcher_cache_capacity: DEFAULT_FETCHER_CACHE_CAPACITY,
            search_timeout: DEFAULT_SEARCH_TIMEOUT.as_secs(),
            retry_backoff_ms: 100,
        }
    }
}

impl From<&NetStoreArgs> for NetStoreConfig {
    fn from(args: &NetStoreArgs) -> Self {
        Self {
            fetcher_cache_capacity: args.fetcher_cache_capacity.max(1),
            search_timeout: Duration::from_secs(args.search_timeout),
            retry_backoff: Duration::from_millis(args.retry_backoff_ms),
        }
    }
}
