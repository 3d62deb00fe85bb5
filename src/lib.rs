pub mod config;
pub mod error;
pub mod field;
pub mod index;
pub mod metrics;
pub mod models;
pub mod posting;
pub mod profile;
pub mod reclaim;
pub mod result;
pub mod store;

pub use config::{IndexConfig, StoreParams};
pub use error::{IndexError, Result};
pub use field::FieldRangeIndex;
pub use index::{MemoryUsage, MultiFieldIndex, SearchOutcome};
pub use metrics::IndexMetrics;
pub use models::{DocId, FieldId, FieldType, FilterInfo};
pub use profile::{numeric_key, InMemoryProfile, Profile};
pub use result::{MultiRangeQueryResults, RangeQueryResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
