use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Parameters handed verbatim to the keyed store backing a field index.
///
/// A disk-paged B-tree store interprets all of them; the in-memory store
/// only logs them at open. They are kept together so a store swap does not
/// ripple through the coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreParams {
    pub mainbits: u32,
    pub bits: u32,
    pub poolsize: u32,
    pub mainpool: u32,
    pub maxleaves: u32,
    pub leafxtra: u32,
    pub mainleafxtra: u32,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            mainbits: 16,
            bits: 16,
            poolsize: 500,
            mainpool: 500,
            maxleaves: 1_000_000,
            leafxtra: 0,
            mainleafxtra: 0,
        }
    }
}

/// Configuration for the multi-field index
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory for per-field store files
    pub path: PathBuf,
    /// Keyed store parameters, passed through to the store constructor
    pub store: StoreParams,
    /// Byte separating tags within a string field value
    pub delimiter: u8,
    /// Minimum time between a buffer's retirement and its release.
    /// Must outlast the longest reader scan holding a buffer handle.
    pub reclaim_grace: Duration,
    /// Capacity of the mutation queue; enqueues beyond it are rejected
    pub mutation_queue_depth: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
            store: StoreParams::default(),
            delimiter: 0x01,
            reclaim_grace: Duration::from_secs(3),
            mutation_queue_depth: 100_000,
        }
    }
}

impl IndexConfig {
    /// Create a configuration rooted at the given store directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the tag delimiter byte
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the reclamation grace period
    pub fn with_reclaim_grace(mut self, grace: Duration) -> Self {
        self.reclaim_grace = grace;
        self
    }

    /// Set the mutation queue capacity
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.mutation_queue_depth = depth;
        self
    }
}
