pub mod filter;
pub mod operation;

use serde::{Deserialize, Serialize};

pub use filter::FilterInfo;
pub use operation::{FieldOperation, OperationKind};

/// Document identifier. Dense, non-negative; the index is optimized for runs.
pub type DocId = u32;

/// Index of a field slot in the coordinator registry
pub type FieldId = usize;

/// Type of an indexed field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Fixed-width encoded numeric value, queried by range
    Numeric,
    /// Delimiter-separated tags, queried by membership
    String,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Numeric)
    }
}
