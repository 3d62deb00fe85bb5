//! Range-bounded query results
//!
//! A search materializes matching document ids into a bitmap spanning the
//! word-aligned union of the touched posting spans. `doc_num` rides along
//! as a count hint; it may overshoot (it sums posting sizes), the bitmap
//! itself is the truth.

use roaring::RoaringBitmap;

use crate::models::DocId;
use crate::posting::bitmap::WORD_BITS;

/// A bitmap over `[min_aligned, max_aligned]` with a document-count hint
#[derive(Clone, Debug, Default)]
pub struct RangeQueryResult {
    min_aligned: i64,
    max_aligned: i64,
    words: Vec<u64>,
    doc_num: usize,
}

impl RangeQueryResult {
    pub fn new() -> Self {
        Self {
            min_aligned: 0,
            max_aligned: -1,
            words: Vec::new(),
            doc_num: 0,
        }
    }

    /// Set the aligned bounds. Both must come from word-aligned posting
    /// spans: `min_aligned` a multiple of the word width, `max_aligned + 1`
    /// likewise.
    pub fn set_range(&mut self, min_aligned: i64, max_aligned: i64) {
        debug_assert_eq!(min_aligned % WORD_BITS as i64, 0);
        debug_assert_eq!((max_aligned + 1) % WORD_BITS as i64, 0);
        self.min_aligned = min_aligned;
        self.max_aligned = max_aligned;
    }

    /// (Re)allocate the bitmap to the configured range, zeroed
    pub fn resize(&mut self) {
        let bits = (self.max_aligned - self.min_aligned + 1).max(0) as usize;
        self.words.clear();
        self.words.resize(bits / WORD_BITS, 0);
    }

    pub fn min_aligned(&self) -> i64 {
        self.min_aligned
    }

    pub fn max_aligned(&self) -> i64 {
        self.max_aligned
    }

    /// Bits spanned, `max_aligned − min_aligned + 1`
    pub fn size(&self) -> i64 {
        self.max_aligned - self.min_aligned + 1
    }

    pub fn doc_num(&self) -> usize {
        self.doc_num
    }

    pub fn set_doc_num(&mut self, doc_num: usize) {
        self.doc_num = doc_num;
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    /// Set the bit for an absolute document id inside the range
    pub fn set_bit(&mut self, doc: i64) {
        debug_assert!(doc >= self.min_aligned && doc <= self.max_aligned);
        let pos = (doc - self.min_aligned) as usize;
        self.words[pos / WORD_BITS] |= 1u64 << (pos % WORD_BITS);
    }

    /// Membership test for an absolute document id
    pub fn contains(&self, doc: DocId) -> bool {
        let v = i64::from(doc);
        if v < self.min_aligned || v > self.max_aligned {
            return false;
        }
        let pos = (v - self.min_aligned) as usize;
        self.words[pos / WORD_BITS] & (1u64 << (pos % WORD_BITS)) != 0
    }

    /// Iterate the set document ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = DocId> + '_ {
        let base = self.min_aligned;
        self.words.iter().enumerate().flat_map(move |(wi, &word)| {
            let word_base = base + (wi * WORD_BITS) as i64;
            (0..WORD_BITS)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| (word_base + bit as i64) as DocId)
        })
    }

    /// Export to a roaring bitmap for downstream candidate filtering
    pub fn to_roaring(&self) -> RoaringBitmap {
        self.iter().collect()
    }
}

/// The filter output handed to the vector-search stage: zero or more
/// range-bounded bitmaps combined by conjunction.
#[derive(Clone, Debug, Default)]
pub struct MultiRangeQueryResults {
    results: Vec<RangeQueryResult>,
}

impl MultiRangeQueryResults {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
        }
    }

    pub fn add(&mut self, result: RangeQueryResult) {
        self.results.push(result);
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[RangeQueryResult] {
        &self.results
    }

    /// True when every held result contains `doc`.
    ///
    /// With no results held there is no constraint and nothing matches;
    /// callers treat an unconstrained search separately.
    pub fn contains(&self, doc: DocId) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.contains(doc))
    }

    /// Conjunction of all held results as a roaring bitmap
    pub fn to_roaring(&self) -> RoaringBitmap {
        let mut iter = self.results.iter();
        let Some(first) = iter.next() else {
            return RoaringBitmap::new();
        };
        iter.fold(first.to_roaring(), |acc, r| acc & r.to_roaring())
    }
}
