use serde::{Deserialize, Serialize};

use super::FieldId;

/// A single-field search constraint.
///
/// Numeric fields interpret `[lower_value, upper_value]` as an inclusive
/// range of encoded keys. String fields carry a delimiter-joined tag list in
/// `lower_value`; `is_union` selects any-of (union) versus all-of semantics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterInfo {
    pub field_id: FieldId,
    pub lower_value: Vec<u8>,
    pub upper_value: Vec<u8>,
    pub is_union: bool,
}

impl FilterInfo {
    /// Create a numeric range filter over encoded keys
    pub fn range(field_id: FieldId, lower: impl Into<Vec<u8>>, upper: impl Into<Vec<u8>>) -> Self {
        Self {
            field_id,
            lower_value: lower.into(),
            upper_value: upper.into(),
            is_union: true,
        }
    }

    /// Create a tag filter matching documents carrying any of the tags
    pub fn tags_any(field_id: FieldId, tags: impl Into<Vec<u8>>) -> Self {
        Self {
            field_id,
            lower_value: tags.into(),
            upper_value: Vec::new(),
            is_union: true,
        }
    }

    /// Create a tag filter matching documents carrying all of the tags
    pub fn tags_all(field_id: FieldId, tags: impl Into<Vec<u8>>) -> Self {
        Self {
            field_id,
            lower_value: tags.into(),
            upper_value: Vec::new(),
            is_union: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_constructors() {
        let range = FilterInfo::range(0, vec![1, 2], vec![3, 4]);
        assert_eq!(range.field_id, 0);
        assert_eq!(range.lower_value, vec![1, 2]);
        assert_eq!(range.upper_value, vec![3, 4]);

        let any = FilterInfo::tags_any(1, b"red\x01blue".to_vec());
        assert!(any.is_union);

        let all = FilterInfo::tags_all(1, b"red\x01blue".to_vec());
        assert!(!all.is_union);
    }
}
