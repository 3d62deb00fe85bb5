use serde::{Deserialize, Serialize};

use super::{DocId, FieldId};

/// Kind of a buffered index mutation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Add,
    Delete,
}

/// A mutation waiting on the write pipeline.
///
/// The raw key bytes are not carried here; the mutation worker fetches them
/// from the profile at apply time, so the queue entry stays small and the
/// profile remains the single source of field values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOperation {
    pub kind: OperationKind,
    pub doc_id: DocId,
    pub field_id: FieldId,
}

impl FieldOperation {
    pub fn add(doc_id: DocId, field_id: FieldId) -> Self {
        Self {
            kind: OperationKind::Add,
            doc_id,
            field_id,
        }
    }

    pub fn delete(doc_id: DocId, field_id: FieldId) -> Self {
        Self {
            kind: OperationKind::Delete,
            doc_id,
            field_id,
        }
    }
}
