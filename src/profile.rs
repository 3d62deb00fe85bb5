//! Document profile collaborator
//!
//! The write pipeline carries only `(doc_id, field_id)`; the raw field
//! bytes are fetched from the profile when a mutation is applied. The
//! profile is external to this crate in production; [`InMemoryProfile`]
//! backs tests and benchmarks.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::models::{DocId, FieldId};

/// Raw attribute storage for indexed documents
pub trait Profile: Send + Sync {
    /// Raw bytes of one field of one document: the encoded numeric value
    /// for numeric fields, the delimiter-joined tag list for string fields
    fn field_raw_value(&self, doc_id: DocId, field_id: FieldId) -> Option<Vec<u8>>;

    /// Number of field slots the coordinator should size its registry for
    fn field_count(&self) -> usize;
}

/// Encode a numeric field value in the fixed-width form the index expects.
///
/// The index normalizes keys by reversing the bytes and flipping the sign
/// bit of the resulting high byte, so callers hand over little-endian
/// two's-complement; after normalization keys compare in numeric order.
pub fn numeric_key(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Map-backed profile for tests and benchmarks
#[derive(Default)]
pub struct InMemoryProfile {
    field_count: usize,
    values: RwLock<HashMap<(DocId, FieldId), Vec<u8>>>,
}

impl InMemoryProfile {
    pub fn new(field_count: usize) -> Self {
        Self {
            field_count,
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Set the raw bytes of one field of one document
    pub fn set_value(&self, doc_id: DocId, field_id: FieldId, bytes: impl Into<Vec<u8>>) {
        self.values.write().insert((doc_id, field_id), bytes.into());
    }
}

impl Profile for InMemoryProfile {
    fn field_raw_value(&self, doc_id: DocId, field_id: FieldId) -> Option<Vec<u8>> {
        self.values.read().get(&(doc_id, field_id)).cloned()
    }

    fn field_count(&self) -> usize {
        self.field_count
    }
}
