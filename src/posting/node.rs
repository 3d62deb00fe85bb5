//! Adaptive posting-list node
//!
//! A node stores the set of document ids filed under one key. Small or
//! sparse sets live in an append-only id array; once the id span exceeds
//! [`CONVERT_MIN_SPAN`] the node converts between that array and a
//! range-aligned bitmap along the density hysteresis band, so lookups stay
//! cheap for dense runs without paying bitmap memory for outliers.
//!
//! Nodes are mutated by a single writer (the mutation worker) while any
//! number of readers scan concurrently. The active buffer is handed out as
//! a shared `Arc` handle; growth and conversion build a replacement buffer,
//! swap it in, and retire the superseded one through the reclamation queue
//! instead of freeing it, so a reader that captured a handle keeps scanning
//! a consistent (if slightly stale) snapshot.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{error, warn};

use crate::error::IndexError;
use crate::models::DocId;
use crate::posting::bitmap::{self, WORD_BITS};
use crate::reclaim::ReclaimHandle;
use crate::Result;

/// Id span above which the density policy is evaluated
pub const CONVERT_MIN_SPAN: i64 = 100_000;

/// Dense nodes below this density convert to sparse
pub const DENSE_TO_SPARSE_DENSITY: f64 = 0.08;

/// Sparse nodes above this density convert to dense.
/// The gap to [`DENSE_TO_SPARSE_DENSITY`] is the hysteresis band.
pub const SPARSE_TO_DENSE_DENSITY: f64 = 0.10;

/// Posting-list representation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Dense,
    Sparse,
}

/// Range-aligned bitmap buffer.
///
/// `base` is the word-aligned lower bound the bitmap was allocated at; it
/// lives inside the buffer so a captured handle stays self-consistent when
/// the node grows downward and re-bases.
#[derive(Debug)]
pub struct DenseBits {
    base: i64,
    words: Box<[AtomicU64]>,
}

impl DenseBits {
    pub fn base(&self) -> i64 {
        self.base
    }

    pub fn words(&self) -> &[AtomicU64] {
        &self.words
    }

    pub fn span_bits(&self) -> i64 {
        (self.words.len() * WORD_BITS) as i64
    }

    fn covers(&self, v: i64) -> bool {
        v >= self.base && v < self.base + self.span_bits()
    }
}

/// Append-only document id slots for the sparse representation.
///
/// Only the first `PostingNode::size()` slots are live; values are in
/// insertion order and not required sorted.
#[derive(Debug)]
pub struct SparseSlots {
    slots: Box<[AtomicU32]>,
}

impl SparseSlots {
    pub fn slots(&self) -> &[AtomicU32] {
        &self.slots
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// A posting buffer: exactly one backing representation
#[derive(Debug)]
pub enum NodeBuffer {
    Dense(DenseBits),
    Sparse(SparseSlots),
}

fn alloc_slots(n: usize) -> Result<Box<[AtomicU32]>> {
    let mut slots: Vec<AtomicU32> = Vec::new();
    slots.try_reserve_exact(n)?;
    slots.resize_with(n, AtomicU32::default);
    Ok(slots.into_boxed_slice())
}

/// Sorted set of document ids for one key.
///
/// Writer methods (`add`, `delete`) must only be called from the single
/// mutation worker; accessor methods are safe from any thread. `min`/`max`
/// are exact under inserts but stay conservative after deletes.
#[derive(Debug)]
pub struct PostingNode {
    min: AtomicI64,
    max: AtomicI64,
    min_aligned: AtomicI64,
    max_aligned: AtomicI64,
    size: AtomicU32,
    capacity: AtomicU32,
    buffer: ArcSwapOption<NodeBuffer>,
}

impl Default for PostingNode {
    fn default() -> Self {
        Self::new()
    }
}

impl PostingNode {
    pub fn new() -> Self {
        Self {
            min: AtomicI64::new(i64::MAX),
            max: AtomicI64::new(-1),
            min_aligned: AtomicI64::new(i64::MAX),
            max_aligned: AtomicI64::new(-1),
            size: AtomicU32::new(0),
            capacity: AtomicU32::new(0),
            buffer: ArcSwapOption::const_empty(),
        }
    }

    pub fn min(&self) -> i64 {
        self.min.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> i64 {
        self.max.load(Ordering::Relaxed)
    }

    pub fn min_aligned(&self) -> i64 {
        self.min_aligned.load(Ordering::Relaxed)
    }

    pub fn max_aligned(&self) -> i64 {
        self.max_aligned.load(Ordering::Relaxed)
    }

    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    pub fn node_type(&self) -> NodeType {
        match self.buffer.load().as_deref() {
            Some(NodeBuffer::Dense(_)) => NodeType::Dense,
            _ => NodeType::Sparse,
        }
    }

    /// Capture a shared handle to the active buffer for scanning
    pub fn buffer(&self) -> Option<Arc<NodeBuffer>> {
        self.buffer.load_full()
    }

    /// Insert `doc`. Converts representation first when the density policy
    /// triggers on the pre-insert state.
    pub fn add(&self, doc: DocId, reclaim: &ReclaimHandle) -> Result<()> {
        let v = i64::from(doc);
        let size = self.size.load(Ordering::Acquire);
        let mut cur = self.buffer.load_full();

        if size > 0 {
            let offset = self.max() - self.min();
            if offset > CONVERT_MIN_SPAN {
                let density = f64::from(size) / offset as f64;
                if let Some(buf) = cur.clone() {
                    match &*buf {
                        NodeBuffer::Dense(dense) if density < DENSE_TO_SPARSE_DENSITY => {
                            cur = Some(self.convert_to_sparse(dense, reclaim)?);
                        }
                        NodeBuffer::Sparse(sparse) if density > SPARSE_TO_DENSE_DENSITY => {
                            cur = Some(self.convert_to_dense(sparse, reclaim)?);
                        }
                        _ => {}
                    }
                }
            }
        }

        match cur.as_deref() {
            Some(NodeBuffer::Dense(dense)) => self.add_dense(dense, v, reclaim),
            Some(NodeBuffer::Sparse(sparse)) => self.add_sparse(Some(sparse), v, reclaim),
            None => self.add_sparse(None, v, reclaim),
        }
    }

    fn add_dense(&self, dense: &DenseBits, v: i64, reclaim: &ReclaimHandle) -> Result<()> {
        let w = WORD_BITS as i64;

        if self.size.load(Ordering::Relaxed) == 0 {
            // deletes drained the node; restart the span around v
            let min_aligned = (v / w) * w;
            let max_aligned = (v / w + 1) * w - 1;
            let words = bitmap::alloc_words(max_aligned - min_aligned + 1)?;
            bitmap::set(&words, (v - min_aligned) as usize);
            let fresh = Arc::new(NodeBuffer::Dense(DenseBits {
                base: min_aligned,
                words,
            }));
            if let Some(old) = self.buffer.swap(Some(fresh)) {
                reclaim.retire(old);
            }
            self.min.store(v, Ordering::Relaxed);
            self.max.store(v, Ordering::Relaxed);
            self.min_aligned.store(min_aligned, Ordering::Relaxed);
            self.max_aligned.store(max_aligned, Ordering::Relaxed);
            self.size.store(1, Ordering::Release);
            return Ok(());
        }

        let old_base = dense.base;
        let old_max_aligned = old_base + dense.span_bits() - 1;

        if v < old_base {
            let new_base = (v / w) * w;
            let words = bitmap::alloc_words(old_max_aligned - new_base + 1)?;
            let word_off = ((old_base - new_base) / w) as usize;
            for (i, word) in dense.words.iter().enumerate() {
                words[i + word_off].store(word.load(Ordering::Relaxed), Ordering::Relaxed);
            }
            bitmap::set(&words, (v - new_base) as usize);
            let fresh = Arc::new(NodeBuffer::Dense(DenseBits {
                base: new_base,
                words,
            }));
            if let Some(old) = self.buffer.swap(Some(fresh)) {
                reclaim.retire(old);
            }
            self.min.store(v, Ordering::Relaxed);
            self.min_aligned.store(new_base, Ordering::Relaxed);
        } else if v > old_max_aligned {
            // 2x headroom past v to amortize append-heavy growth
            let new_max_aligned = (v / w + 1) * w * 2 - 1;
            let words = bitmap::alloc_words(new_max_aligned - old_base + 1)?;
            for (i, word) in dense.words.iter().enumerate() {
                words[i].store(word.load(Ordering::Relaxed), Ordering::Relaxed);
            }
            bitmap::set(&words, (v - old_base) as usize);
            let fresh = Arc::new(NodeBuffer::Dense(DenseBits {
                base: old_base,
                words,
            }));
            if let Some(old) = self.buffer.swap(Some(fresh)) {
                reclaim.retire(old);
            }
            self.max.store(v, Ordering::Relaxed);
            self.max_aligned.store(new_max_aligned, Ordering::Relaxed);
        } else {
            bitmap::set(&dense.words, (v - old_base) as usize);
            self.min.fetch_min(v, Ordering::Relaxed);
            self.max.fetch_max(v, Ordering::Relaxed);
        }

        self.size.fetch_add(1, Ordering::Release);
        Ok(())
    }

    fn add_sparse(
        &self,
        sparse: Option<&SparseSlots>,
        v: i64,
        reclaim: &ReclaimHandle,
    ) -> Result<()> {
        let w = WORD_BITS as i64;
        self.min.fetch_min(v, Ordering::Relaxed);
        self.max.fetch_max(v, Ordering::Relaxed);
        if v < self.min_aligned() {
            self.min_aligned.store((v / w) * w, Ordering::Relaxed);
        }
        if v > self.max_aligned() {
            self.max_aligned.store((v / w + 1) * w - 1, Ordering::Relaxed);
        }

        let size = self.size.load(Ordering::Relaxed) as usize;
        match sparse {
            Some(live) if size < live.capacity() => {
                live.slots()[size].store(v as u32, Ordering::Release);
            }
            _ => {
                // first slot or capacity doubling
                let new_cap = sparse.map_or(1, |s| (s.capacity() * 2).max(1));
                let slots = alloc_slots(new_cap)?;
                if let Some(old) = sparse {
                    for (i, slot) in old.slots().iter().take(size).enumerate() {
                        slots[i].store(slot.load(Ordering::Relaxed), Ordering::Relaxed);
                    }
                }
                slots[size].store(v as u32, Ordering::Release);
                let fresh = Arc::new(NodeBuffer::Sparse(SparseSlots { slots }));
                if let Some(old) = self.buffer.swap(Some(fresh)) {
                    reclaim.retire(old);
                }
                self.capacity.store(new_cap as u32, Ordering::Relaxed);
            }
        }
        self.size.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Remove `doc`. The span never shrinks and `min`/`max` stay where the
    /// removed id left them.
    pub fn delete(&self, doc: DocId) -> Result<()> {
        let v = i64::from(doc);
        let cur = self.buffer.load_full();

        match cur.as_deref() {
            Some(NodeBuffer::Dense(dense)) => {
                if self.size.load(Ordering::Relaxed) == 0 || !dense.covers(v) {
                    return Err(IndexError::NotFound(doc));
                }
                self.size.fetch_sub(1, Ordering::Release);
                bitmap::clear(dense.words(), (v - dense.base()) as usize);
                Ok(())
            }
            Some(NodeBuffer::Sparse(sparse)) => {
                let slots = sparse.slots();
                let live = (self.size.load(Ordering::Acquire) as usize).min(slots.len());
                let hit = (0..live).find(|&i| slots[i].load(Ordering::Relaxed) == doc);
                let Some(hit) = hit else {
                    return Err(IndexError::NotFound(doc));
                };
                for j in hit..live - 1 {
                    slots[j].store(slots[j + 1].load(Ordering::Relaxed), Ordering::Relaxed);
                }
                self.size.fetch_sub(1, Ordering::Release);
                Ok(())
            }
            None => Err(IndexError::NotFound(doc)),
        }
    }

    fn convert_to_sparse(
        &self,
        dense: &DenseBits,
        reclaim: &ReclaimHandle,
    ) -> Result<Arc<NodeBuffer>> {
        let size = self.size.load(Ordering::Relaxed) as usize;
        let slots = alloc_slots(size)?;
        let mut idx = 0;
        for i in 0..dense.span_bits() as usize {
            if bitmap::test(dense.words(), i) {
                if idx >= size {
                    warn!(idx, size, bit = i, "dense bitmap holds more bits than size");
                    break;
                }
                slots[idx].store((i as i64 + dense.base()) as u32, Ordering::Relaxed);
                idx += 1;
            }
        }
        if idx != size {
            error!(
                size,
                idx,
                min_aligned = self.min_aligned(),
                max_aligned = self.max_aligned(),
                "dense bitmap population disagrees with size"
            );
        }

        let fresh = Arc::new(NodeBuffer::Sparse(SparseSlots { slots }));
        if let Some(old) = self.buffer.swap(Some(fresh.clone())) {
            reclaim.retire(old);
        }
        self.capacity.store(size as u32, Ordering::Relaxed);
        Ok(fresh)
    }

    fn convert_to_dense(
        &self,
        sparse: &SparseSlots,
        reclaim: &ReclaimHandle,
    ) -> Result<Arc<NodeBuffer>> {
        let min_aligned = self.min_aligned();
        let max_aligned = self.max_aligned();
        let words = bitmap::alloc_words(max_aligned - min_aligned + 1)?;

        let size = self.size.load(Ordering::Relaxed) as usize;
        let live = size.min(sparse.capacity());
        for slot in sparse.slots().iter().take(live) {
            let v = i64::from(slot.load(Ordering::Relaxed));
            if v < min_aligned || v > max_aligned {
                warn!(v, min_aligned, max_aligned, "sparse id outside aligned span");
                continue;
            }
            bitmap::set(&words, (v - min_aligned) as usize);
        }

        let fresh = Arc::new(NodeBuffer::Dense(DenseBits {
            base: min_aligned,
            words,
        }));
        if let Some(old) = self.buffer.swap(Some(fresh.clone())) {
            reclaim.retire(old);
        }
        Ok(fresh)
    }

    /// Membership probe against the live buffer
    pub fn contains(&self, doc: DocId) -> bool {
        let v = i64::from(doc);
        match self.buffer.load_full().as_deref() {
            Some(NodeBuffer::Dense(dense)) => {
                dense.covers(v) && bitmap::test(dense.words(), (v - dense.base()) as usize)
            }
            Some(NodeBuffer::Sparse(sparse)) => {
                let slots = sparse.slots();
                let live = (self.size() as usize).min(slots.len());
                slots[..live]
                    .iter()
                    .any(|s| s.load(Ordering::Relaxed) == doc)
            }
            None => false,
        }
    }

    /// Fold this node's buffer bytes into dense/sparse accumulators
    pub fn memory_size(&self, dense: &mut u64, sparse: &mut u64) {
        match self.node_type() {
            NodeType::Dense => {
                *dense += (self.max_aligned() - self.min_aligned()).max(0) as u64 / 8;
            }
            NodeType::Sparse => {
                *sparse += u64::from(self.capacity.load(Ordering::Relaxed))
                    * std::mem::size_of::<u32>() as u64;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclaim::ReclaimQueue;
    use std::time::Duration;

    fn queue() -> ReclaimQueue {
        ReclaimQueue::new(Duration::from_millis(10))
    }

    #[test]
    fn test_empty_node_sentinels() {
        let node = PostingNode::new();
        assert_eq!(node.min(), i64::MAX);
        assert_eq!(node.max(), -1);
        assert_eq!(node.min_aligned(), i64::MAX);
        assert_eq!(node.max_aligned(), -1);
        assert_eq!(node.size(), 0);
        assert_eq!(node.node_type(), NodeType::Sparse);
        assert!(!node.contains(0));
    }

    #[test]
    fn test_first_insert_is_sparse() {
        let q = queue();
        let node = PostingNode::new();
        node.add(100, &q.handle()).unwrap();

        assert_eq!(node.node_type(), NodeType::Sparse);
        assert_eq!(node.size(), 1);
        assert_eq!(node.min(), 100);
        assert_eq!(node.max(), 100);
        assert_eq!(node.min_aligned(), 64);
        assert_eq!(node.max_aligned(), 127);
        assert!(node.contains(100));
        assert!(!node.contains(101));
    }

    #[test]
    fn test_aligned_bounds_stay_word_multiples() {
        let q = queue();
        let node = PostingNode::new();
        for doc in [5u32, 900, 63, 64, 12_345] {
            node.add(doc, &q.handle()).unwrap();
            assert_eq!(node.min_aligned() % 64, 0);
            assert_eq!((node.max_aligned() + 1) % 64, 0);
            assert!(node.min_aligned() <= node.min());
            assert!(node.max() <= node.max_aligned());
        }
    }

    #[test]
    fn test_sparse_capacity_doubles() {
        let q = queue();
        let node = PostingNode::new();
        for doc in 0..9u32 {
            node.add(doc * 3, &q.handle()).unwrap();
        }
        assert_eq!(node.size(), 9);
        for doc in 0..9u32 {
            assert!(node.contains(doc * 3));
        }
        // 1 -> 2 -> 4 -> 8 -> 16 slot growth leaves four retired buffers
        assert_eq!(q.pending(), 4);
    }

    #[test]
    fn test_delete_sparse() {
        let q = queue();
        let node = PostingNode::new();
        for doc in [10u32, 20, 30] {
            node.add(doc, &q.handle()).unwrap();
        }
        node.delete(20).unwrap();
        assert_eq!(node.size(), 2);
        assert!(node.contains(10));
        assert!(!node.contains(20));
        assert!(node.contains(30));

        assert!(matches!(node.delete(20), Err(IndexError::NotFound(20))));
    }

    fn dense_node(q: &ReclaimQueue, lo: u32, hi: u32, step: u32) -> PostingNode {
        // span > CONVERT_MIN_SPAN with density > 0.10 converts to dense
        let node = PostingNode::new();
        let mut doc = lo;
        while doc <= hi {
            node.add(doc, &q.handle()).unwrap();
            doc += step;
        }
        assert_eq!(node.node_type(), NodeType::Dense);
        node
    }

    #[test]
    fn test_sparse_to_dense_conversion_keeps_members() {
        let q = queue();
        let node = dense_node(&q, 0, 150_000, 10);
        for doc in (0..=150_000u32).step_by(10) {
            assert!(node.contains(doc), "lost {doc}");
        }
        assert!(!node.contains(5));
    }

    #[test]
    fn test_dense_upward_growth_has_headroom() {
        let q = queue();
        let node = dense_node(&q, 0, 150_000, 10);
        let before = node.max_aligned();

        let doc = (before + 1) as u32;
        node.add(doc, &q.handle()).unwrap();
        assert!(node.contains(doc));
        // new span ends one word short of 2x the word holding doc
        assert_eq!(node.max_aligned(), (i64::from(doc) / 64 + 1) * 64 * 2 - 1);
        assert_eq!(node.max(), i64::from(doc));
    }

    #[test]
    fn test_dense_downward_growth() {
        let q = queue();
        let node = dense_node(&q, 100_000, 250_000, 10);
        assert_eq!(node.min_aligned(), (100_000 / 64) * 64);

        let below = node.min_aligned() as u32 - 1;
        node.add(below, &q.handle()).unwrap();
        assert!(node.contains(below));
        assert_eq!(node.min(), i64::from(below));
        assert_eq!(node.min_aligned(), (i64::from(below) / 64) * 64);
        // old members survive the re-base
        assert!(node.contains(100_000));
        assert!(node.contains(250_000));
    }

    #[test]
    fn test_delete_dense() {
        let q = queue();
        let node = dense_node(&q, 0, 150_000, 10);
        let size = node.size();

        node.delete(500).unwrap();
        assert!(!node.contains(500));
        assert_eq!(node.size(), size - 1);

        // out of span
        assert!(matches!(
            node.delete(4_000_000),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn test_reader_handle_survives_growth() {
        let q = queue();
        let node = PostingNode::new();
        node.add(3, &q.handle()).unwrap();

        let captured = node.buffer().unwrap();

        // force capacity growth; the old one-slot buffer is retired, not freed
        node.add(9, &q.handle()).unwrap();

        match &*captured {
            NodeBuffer::Sparse(s) => {
                assert_eq!(s.capacity(), 1);
                assert_eq!(s.slots()[0].load(Ordering::Relaxed), 3);
            }
            NodeBuffer::Dense(_) => panic!("expected sparse buffer"),
        }
        assert!(node.contains(9));
    }

    #[test]
    fn test_hysteresis_band_boundaries() {
        // density 0.09 inside the band: no conversion either way
        let q = queue();
        let node = PostingNode::new();
        // 10_000 ids over a 110_000 span
        for i in 0..10_000u32 {
            node.add(i * 11, &q.handle()).unwrap();
        }
        let offset = node.max() - node.min();
        let density = f64::from(node.size()) / offset as f64;
        assert!(offset > CONVERT_MIN_SPAN);
        assert!(density > DENSE_TO_SPARSE_DENSITY && density < SPARSE_TO_DENSE_DENSITY);
        assert_eq!(node.node_type(), NodeType::Sparse);
    }

    #[test]
    fn test_insert_delete_roundtrip_restores_membership() {
        let q = queue();
        let node = PostingNode::new();
        for doc in [1u32, 2, 3] {
            node.add(doc, &q.handle()).unwrap();
        }

        node.add(77, &q.handle()).unwrap();
        node.delete(77).unwrap();

        for doc in [1u32, 2, 3] {
            assert!(node.contains(doc));
        }
        assert!(!node.contains(77));
        assert_eq!(node.size(), 3);
    }

    #[test]
    fn test_memory_size_split() {
        let q = queue();
        let node = PostingNode::new();
        node.add(1, &q.handle()).unwrap();

        let (mut dense, mut sparse) = (0u64, 0u64);
        node.memory_size(&mut dense, &mut sparse);
        assert_eq!(dense, 0);
        assert!(sparse > 0);
    }
}
