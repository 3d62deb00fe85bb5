//! Per-field range/tag index
//!
//! One field owns one ordered keyed store. Numeric fields map a value to a
//! single normalized key; string fields split the raw value on the
//! delimiter and file the document under every tag. Searches walk the
//! matching keys, fold the posting extremes into one aligned range, and OR
//! every posting list into the caller's result bitmap.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use roaring::RoaringBitmap;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{DocId, FieldId, FieldType};
use crate::posting::bitmap::WORD_BITS;
use crate::posting::{NodeBuffer, PostingNode};
use crate::reclaim::ReclaimHandle;
use crate::result::RangeQueryResult;
use crate::store::{BTreeStore, KeyedStore};
use crate::Result;

/// Normalize a caller-encoded numeric key: reverse the byte order and flip
/// the sign bit of the resulting high byte, so unsigned lexicographic
/// comparison of normalized keys matches signed numeric order. Applied
/// identically to inserted keys and query bounds.
fn reverse_endian(key: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = key.iter().rev().copied().collect();
    if let Some(first) = out.first_mut() {
        *first ^= 0x80;
    }
    out
}

/// Range/tag index over a single document field
pub struct FieldRangeIndex {
    field_id: FieldId,
    field_type: FieldType,
    delimiter: u8,
    store: Box<dyn KeyedStore>,
    /// Documents currently filed under this field. Guards against the
    /// double-add that would overcount postings and strand a copy on
    /// delete.
    indexed: RwLock<RoaringBitmap>,
}

impl FieldRangeIndex {
    pub fn new(config: &IndexConfig, field_id: FieldId, field_type: FieldType) -> Self {
        Self::with_store(
            Box::new(BTreeStore::open(&config.path, field_id, &config.store)),
            field_id,
            field_type,
            config.delimiter,
        )
    }

    /// Build against a caller-provided keyed store
    pub fn with_store(
        store: Box<dyn KeyedStore>,
        field_id: FieldId,
        field_type: FieldType,
        delimiter: u8,
    ) -> Self {
        Self {
            field_id,
            field_type,
            delimiter,
            store,
            indexed: RwLock::new(RoaringBitmap::new()),
        }
    }

    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    pub fn is_numeric(&self) -> bool {
        self.field_type.is_numeric()
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// True when `doc_id` is currently filed under this field
    pub fn is_indexed(&self, doc_id: DocId) -> bool {
        self.indexed.read().contains(doc_id)
    }

    /// Keys a raw field value expands to: one normalized key for numeric
    /// fields, one key per delimiter-separated tag for string fields.
    fn derive_keys(&self, key: &[u8]) -> Vec<Vec<u8>> {
        if self.field_type.is_numeric() {
            vec![reverse_endian(key)]
        } else {
            key.split(|&b| b == self.delimiter)
                .filter(|tag| !tag.is_empty())
                .map(<[u8]>::to_vec)
                .collect()
        }
    }

    /// File `doc_id` under every key derived from the raw value.
    ///
    /// Returns `Ok(false)` when the document was already filed and the add
    /// was ignored.
    pub fn add(&self, key: &[u8], doc_id: DocId, reclaim: &ReclaimHandle) -> Result<bool> {
        {
            let mut indexed = self.indexed.write();
            if indexed.contains(doc_id) {
                warn!(doc_id, field = self.field_id, "duplicate add ignored");
                return Ok(false);
            }
            indexed.insert(doc_id);
        }

        for derived in self.derive_keys(key) {
            let node = match self.store.find(&derived) {
                Some(node) => node,
                None => {
                    let node = Arc::new(PostingNode::new());
                    match self.store.insert_unique(&derived, node.clone()) {
                        Ok(()) => node,
                        Err(IndexError::KeyExists) => self
                            .store
                            .find(&derived)
                            .ok_or(IndexError::StoreClosed)?,
                        Err(err) => return Err(err),
                    }
                }
            };
            node.add(doc_id, reclaim)?;
        }
        Ok(true)
    }

    /// Remove `doc_id` from every key derived from the raw value.
    ///
    /// A document that was never filed returns `NotFound`; a missing
    /// derived key is logged and skipped so one stale tag never aborts the
    /// pipeline.
    pub fn delete(&self, key: &[u8], doc_id: DocId) -> Result<()> {
        if !self.indexed.write().remove(doc_id) {
            warn!(doc_id, field = self.field_id, "delete of unindexed document");
            return Err(IndexError::NotFound(doc_id));
        }

        for derived in self.derive_keys(key) {
            match self.store.find(&derived) {
                Some(node) => {
                    if let Err(err) = node.delete(doc_id) {
                        warn!(doc_id, field = self.field_id, %err, "posting delete failed");
                    }
                }
                None => warn!(doc_id, field = self.field_id, "delete key not present"),
            }
        }
        Ok(())
    }

    /// Range search for numeric fields; string fields fall through to a
    /// union tag search on `lower`. Returns the spanned id range
    /// `max − min + 1` (0 when nothing matched); the populated `out`
    /// carries the matched ids and a summed-size `doc_num` hint.
    pub fn search(&self, lower: &[u8], upper: &[u8], out: &mut RangeQueryResult) -> i64 {
        if !self.field_type.is_numeric() {
            return self.search_tags(lower, out);
        }

        let low = reverse_endian(lower);
        let high = reverse_endian(upper);

        let mut nodes = Vec::new();
        let mut min_doc = i64::MAX;
        let mut min_aligned = i64::MAX;
        let mut max_doc = -1i64;
        let mut max_aligned = -1i64;

        for (key, node) in self.store.iterate_from(Some(low.as_slice())) {
            if key.as_ref() > high.as_slice() {
                break;
            }
            min_doc = min_doc.min(node.min());
            min_aligned = min_aligned.min(node.min_aligned());
            max_doc = max_doc.max(node.max());
            max_aligned = max_aligned.max(node.max_aligned());
            nodes.push(node);
        }

        if max_doc < min_doc {
            return 0;
        }

        out.set_range(min_aligned, max_aligned);
        out.resize();

        let mut total = 0;
        for node in &nodes {
            total += fold_node_into(node, out);
        }
        out.set_doc_num(total);

        max_doc - min_doc + 1
    }

    /// Union tag search: documents carrying any of the delimiter-joined
    /// tags. Returns the summed posting sizes (0 when nothing matched).
    /// All-of semantics are composed one level up by splitting the filter.
    pub fn search_tags(&self, tags: &[u8], out: &mut RangeQueryResult) -> i64 {
        let mut nodes = Vec::new();
        for tag in tags.split(|&b| b == self.delimiter).filter(|t| !t.is_empty()) {
            match self.store.find(tag) {
                Some(node) => nodes.push(node),
                None => debug!(
                    field = self.field_id,
                    tag = %String::from_utf8_lossy(tag),
                    "tag not indexed"
                ),
            }
        }

        let mut min_doc = i64::MAX;
        let mut max_doc = -1i64;
        for node in &nodes {
            if node.size() == 0 {
                continue;
            }
            min_doc = min_doc.min(node.min_aligned());
            max_doc = max_doc.max(node.max_aligned());
        }

        if max_doc < min_doc {
            return 0;
        }

        out.set_range(min_doc, max_doc);
        out.resize();

        let mut total = 0;
        for node in &nodes {
            total += fold_node_into(node, out);
        }
        out.set_doc_num(total);

        total as i64
    }

    /// Accumulate buffer bytes across all postings; returns the summed
    /// node-struct overhead.
    pub fn scan_memory(&self, dense: &mut u64, sparse: &mut u64) -> u64 {
        let mut total = 0;
        for (_, node) in self.store.iterate_from(None) {
            node.memory_size(dense, sparse);
            total += std::mem::size_of::<PostingNode>() as u64;
        }
        total
    }
}

impl Drop for FieldRangeIndex {
    fn drop(&mut self) {
        // releases every posting node held by the store
        self.store.close();
    }
}

/// OR one posting list into `out` and return its size contribution.
///
/// The scan runs against a captured buffer handle; a buffer the concurrent
/// writer has already outgrown is clipped (or skipped, when re-based below
/// the output range) rather than trusted.
fn fold_node_into(node: &PostingNode, out: &mut RangeQueryResult) -> usize {
    let Some(buf) = node.buffer() else {
        return 0;
    };
    match &*buf {
        NodeBuffer::Dense(dense) => {
            if dense.base() < out.min_aligned() {
                return 0;
            }
            let word_off = ((dense.base() - out.min_aligned()) / WORD_BITS as i64) as usize;
            let out_words = out.words_mut();
            for (i, word) in dense.words().iter().enumerate() {
                let Some(dst) = out_words.get_mut(i + word_off) else {
                    break;
                };
                *dst |= word.load(Ordering::Relaxed);
            }
            node.size() as usize
        }
        NodeBuffer::Sparse(sparse) => {
            let slots = sparse.slots();
            let live = (node.size() as usize).min(slots.len());
            for slot in &slots[..live] {
                let v = i64::from(slot.load(Ordering::Acquire));
                if v < out.min_aligned() || v > out.max_aligned() {
                    continue;
                }
                out.set_bit(v);
            }
            node.size() as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::numeric_key;
    use crate::reclaim::ReclaimQueue;
    use std::time::Duration;
    use tempfile::TempDir;

    fn field(field_type: FieldType) -> (TempDir, FieldRangeIndex, ReclaimQueue) {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig::new(dir.path());
        let index = FieldRangeIndex::new(&config, 0, field_type);
        let queue = ReclaimQueue::new(Duration::from_millis(10));
        (dir, index, queue)
    }

    #[test]
    fn test_reverse_endian_orders_numerically() {
        let values = [-5_000i32, -1, 0, 1, 42, 50, 5_000];
        let normalized: Vec<_> = values
            .iter()
            .map(|&v| reverse_endian(&numeric_key(v)))
            .collect();
        for pair in normalized.windows(2) {
            assert!(pair[0] < pair[1], "normalized keys out of order");
        }
    }

    #[test]
    fn test_reverse_endian_flips_high_byte() {
        let out = reverse_endian(&[0x01, 0x02, 0x03]);
        assert_eq!(out, vec![0x83, 0x02, 0x01]);
    }

    #[test]
    fn test_derive_keys_numeric_single() {
        let (_dir, index, _q) = field(FieldType::Numeric);
        let keys = index.derive_keys(&numeric_key(7));
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_derive_keys_splits_tags() {
        let (_dir, index, _q) = field(FieldType::String);
        let keys = index.derive_keys(b"red\x01blue\x01\x01green");
        assert_eq!(
            keys,
            vec![b"red".to_vec(), b"blue".to_vec(), b"green".to_vec()]
        );
    }

    #[test]
    fn test_numeric_range_search() {
        let (_dir, index, q) = field(FieldType::Numeric);
        for doc in [10u32, 11, 12] {
            index.add(&numeric_key(42), doc, &q.handle()).unwrap();
        }
        index.add(&numeric_key(50), 1000, &q.handle()).unwrap();
        index.add(&numeric_key(99), 7, &q.handle()).unwrap();

        let mut out = RangeQueryResult::new();
        let ret = index.search(&numeric_key(42), &numeric_key(50), &mut out);
        assert_eq!(ret, 1000 - 10 + 1);
        assert_eq!(out.doc_num(), 4);
        for doc in [10u32, 11, 12, 1000] {
            assert!(out.contains(doc), "missing {doc}");
        }
        assert!(!out.contains(7));
        assert!(!out.contains(13));
    }

    #[test]
    fn test_numeric_range_with_negative_bounds() {
        let (_dir, index, q) = field(FieldType::Numeric);
        index.add(&numeric_key(-10), 1, &q.handle()).unwrap();
        index.add(&numeric_key(3), 2, &q.handle()).unwrap();
        index.add(&numeric_key(200), 3, &q.handle()).unwrap();

        let mut out = RangeQueryResult::new();
        let ret = index.search(&numeric_key(-20), &numeric_key(10), &mut out);
        assert!(ret > 0);
        assert!(out.contains(1));
        assert!(out.contains(2));
        assert!(!out.contains(3));
    }

    #[test]
    fn test_empty_range_returns_zero() {
        let (_dir, index, q) = field(FieldType::Numeric);
        index.add(&numeric_key(10), 5, &q.handle()).unwrap();

        let mut out = RangeQueryResult::new();
        assert_eq!(index.search(&numeric_key(20), &numeric_key(30), &mut out), 0);
        assert_eq!(out.size(), 0);
    }

    #[test]
    fn test_point_query_round_trip() {
        let (_dir, index, q) = field(FieldType::Numeric);
        index.add(&numeric_key(42), 123, &q.handle()).unwrap();

        let mut out = RangeQueryResult::new();
        let ret = index.search(&numeric_key(42), &numeric_key(42), &mut out);
        assert!(ret > 0);
        assert!(out.contains(123));
    }

    #[test]
    fn test_insert_delete_leaves_range_unchanged() {
        let (_dir, index, q) = field(FieldType::Numeric);
        index.add(&numeric_key(42), 10, &q.handle()).unwrap();

        index.add(&numeric_key(42), 11, &q.handle()).unwrap();
        index.delete(&numeric_key(42), 11).unwrap();

        let mut out = RangeQueryResult::new();
        index.search(&numeric_key(42), &numeric_key(42), &mut out);
        assert!(out.contains(10));
        assert!(!out.contains(11));
    }

    #[test]
    fn test_tag_union_search() {
        let (_dir, index, q) = field(FieldType::String);
        index.add(b"red\x01blue", 7, &q.handle()).unwrap();
        index.add(b"blue\x01green", 8, &q.handle()).unwrap();

        let mut out = RangeQueryResult::new();
        let total = index.search_tags(b"blue", &mut out);
        assert_eq!(total, 2);
        assert!(out.contains(7));
        assert!(out.contains(8));

        let mut out = RangeQueryResult::new();
        let total = index.search_tags(b"red\x01green", &mut out);
        assert_eq!(total, 2);
        assert!(out.contains(7));
        assert!(out.contains(8));

        // unknown tags are skipped, not fatal
        let mut out = RangeQueryResult::new();
        assert_eq!(index.search_tags(b"mauve", &mut out), 0);
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let (_dir, index, q) = field(FieldType::String);
        assert!(index.add(b"red", 7, &q.handle()).unwrap());
        assert!(!index.add(b"red", 7, &q.handle()).unwrap());

        let mut out = RangeQueryResult::new();
        assert_eq!(index.search_tags(b"red", &mut out), 1);

        index.delete(b"red", 7).unwrap();
        let mut out = RangeQueryResult::new();
        assert_eq!(index.search_tags(b"red", &mut out), 0);
    }

    #[test]
    fn test_delete_unknown_doc() {
        let (_dir, index, q) = field(FieldType::Numeric);
        index.add(&numeric_key(42), 10, &q.handle()).unwrap();

        assert!(matches!(
            index.delete(&numeric_key(42), 999),
            Err(IndexError::NotFound(999))
        ));

        // existing postings unaffected
        let mut out = RangeQueryResult::new();
        assert!(index.search(&numeric_key(42), &numeric_key(42), &mut out) > 0);
        assert!(out.contains(10));
    }

    #[test]
    fn test_scan_memory() {
        let (_dir, index, q) = field(FieldType::Numeric);
        index.add(&numeric_key(1), 1, &q.handle()).unwrap();
        index.add(&numeric_key(2), 2, &q.handle()).unwrap();

        let (mut dense, mut sparse) = (0, 0);
        let overhead = index.scan_memory(&mut dense, &mut sparse);
        assert!(overhead > 0);
        assert!(sparse > 0);
    }
}
