//! Multi-range bitmap intersection

use crate::posting::bitmap::WORD_BITS;
use crate::result::RangeQueryResult;

/// AND a set of range-bounded bitmaps into `out`.
///
/// The overlap is `[max(min_aligned), min(max_aligned)]`; every input spans
/// it entirely, so the output starts as a copy of the shortest result and
/// the rest are folded in word by word at their respective offsets. Returns
/// the shortest result's `doc_num` (an upper bound; the bitmap is the
/// truth), or 0 when the ranges do not overlap.
pub(crate) fn intersect(
    results: &[RangeQueryResult],
    shortest_idx: usize,
    out: &mut RangeQueryResult,
) -> usize {
    if results.is_empty() {
        return 0;
    }

    let mut min_doc = i64::MIN;
    let mut max_doc = i64::MAX;
    for r in results {
        min_doc = min_doc.max(r.min_aligned());
        max_doc = max_doc.min(r.max_aligned());
    }
    if max_doc < min_doc {
        return 0;
    }

    out.set_range(min_doc, max_doc);
    out.resize();

    let w = WORD_BITS as i64;
    let out_len = out.words().len();

    let shortest = &results[shortest_idx];
    let off = ((min_doc - shortest.min_aligned()) / w) as usize;
    out.words_mut()
        .copy_from_slice(&shortest.words()[off..off + out_len]);

    for (i, r) in results.iter().enumerate() {
        if i == shortest_idx {
            continue;
        }
        let off = ((min_doc - r.min_aligned()) / w) as usize;
        let words = r.words();
        for (k, dst) in out.words_mut().iter_mut().enumerate() {
            *dst &= words[k + off];
        }
    }

    out.set_doc_num(shortest.doc_num());
    shortest.doc_num()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_bits(min_aligned: i64, max_aligned: i64, bits: &[i64]) -> RangeQueryResult {
        let mut r = RangeQueryResult::new();
        r.set_range(min_aligned, max_aligned);
        r.resize();
        for &bit in bits {
            r.set_bit(bit);
        }
        r.set_doc_num(bits.len());
        r
    }

    #[test]
    fn test_overlapping_ranges() {
        // [0, 1023] and [512, 2047] overlap on [512, 1023]
        let a = result_with_bits(0, 1023, &[100, 600, 700, 1000]);
        let b = result_with_bits(512, 2047, &[600, 1000, 1500]);

        let mut out = RangeQueryResult::new();
        let count = intersect(&[a, b], 1, &mut out);

        assert!(count > 0);
        assert_eq!(out.min_aligned(), 512);
        assert_eq!(out.max_aligned(), 1023);
        assert!(out.contains(600));
        assert!(out.contains(1000));
        assert!(!out.contains(100));
        assert!(!out.contains(700));
        assert!(!out.contains(1500));
    }

    #[test]
    fn test_disjoint_ranges() {
        let a = result_with_bits(0, 63, &[5]);
        let b = result_with_bits(1024, 2047, &[1500]);

        let mut out = RangeQueryResult::new();
        assert_eq!(intersect(&[a, b], 0, &mut out), 0);
    }

    #[test]
    fn test_three_way_intersection() {
        let a = result_with_bits(0, 1023, &[64, 128, 256, 512]);
        let b = result_with_bits(0, 1023, &[128, 256, 512, 900]);
        let c = result_with_bits(64, 1023, &[64, 256, 512]);

        let mut out = RangeQueryResult::new();
        let count = intersect(&[a, b, c], 2, &mut out);

        assert!(count > 0);
        let docs: Vec<_> = out.iter().collect();
        assert_eq!(docs, vec![256, 512]);
    }

    #[test]
    fn test_doc_num_is_shortest() {
        let a = result_with_bits(0, 1023, &[1, 2, 3, 4, 5]);
        let b = result_with_bits(0, 1023, &[2, 3]);

        let mut out = RangeQueryResult::new();
        let count = intersect(&[a, b], 1, &mut out);
        assert_eq!(count, 2);
        assert_eq!(out.doc_num(), 2);
    }

    #[test]
    fn test_empty_input() {
        let mut out = RangeQueryResult::new();
        assert_eq!(intersect(&[], 0, &mut out), 0);
    }
}
