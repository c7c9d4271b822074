//! Read-side chunk slicing.
//!
//! Reading a sparse delta chain means choosing between one large read that
//! covers unrelated bytes and many small reads that each cost a syscall.
//! The functions here split a sorted revision list into groups that should
//! each be read in one call: first on payload density (skip only gaps large
//! enough to be worth a separate read), then on a maximum read size.
//!
//! Everything operates through [`SpanSource`], so the same code scores
//! not-yet-written delta candidates (via [`PendingDelta`]) and plans bulk
//! reads over the real index.

use std::collections::BinaryHeap;

use crate::error::{Result, RevlogError};

/// Byte-span metadata for revisions, keyed by revision number.
///
/// Revision `-1` must report a zero-length span at offset 0.
pub trait SpanSource {
    /// Offset of the revision's stored payload in the data stream.
    fn start(&self, rev: i32) -> u64;
    /// Stored (compressed) payload length.
    fn length(&self, rev: i32) -> u64;
    /// End offset of the stored payload.
    fn end(&self, rev: i32) -> u64 {
        self.start(rev) + self.length(rev)
    }
    /// Number of revisions in the log.
    fn count(&self) -> i32;
}

/// Span facts about a delta candidate that has not been written yet.
///
/// When present, the candidate behaves as a virtual revision appended at
/// the end of the log.
#[derive(Debug, Clone, Copy)]
pub struct PendingDelta {
    /// Encoded length of the candidate delta.
    pub delta_len: u64,
    /// Cumulative stored size of the candidate's whole chain.
    pub compressed_delta_len: u64,
    /// Byte distance needed to materialize the candidate.
    pub distance: u64,
}

/// Byte span covered by a sorted segment of revisions: end of the last
/// entry minus start of the first. The last entry may be the virtual
/// pending delta.
pub fn segment_span(source: &dyn SpanSource, revs: &[i32], pending: Option<&PendingDelta>) -> u64 {
    let Some((&last, _)) = revs.split_last() else {
        return 0;
    };
    let end = match pending {
        Some(info) if source.count() <= last => {
            if revs.len() == 1 {
                return info.delta_len;
            }
            info.delta_len + source.end(source.count() - 1)
        }
        _ => source.end(last),
    };
    end - source.start(revs[0])
}

/// Slices `revs` into groups to read in one call each: density first, then
/// an optional maximum chunk size.
///
/// `target_size` bounds the span of each returned group (still never going
/// below `min_gap_size`, and never splitting a single oversized revision).
/// It cannot be combined with a pending delta: the size bound is a
/// read-path guarantee, the pending delta a write-path scoring device.
pub fn slice_chunk(
    source: &dyn SpanSource,
    revs: &[i32],
    pending: Option<&PendingDelta>,
    target_size: Option<u64>,
    target_density: f64,
    min_gap_size: u64,
) -> Result<Vec<Vec<i32>>> {
    if pending.is_some() && target_size.is_some() {
        return Err(RevlogError::InvalidArgument(
            "cannot use a target size with a pending delta".into(),
        ));
    }
    let target_size = target_size.map(|size| size.max(min_gap_size));

    let mut chunks = Vec::new();
    for group in slice_to_density(source, revs, pending, target_density, min_gap_size) {
        for sub in slice_to_size(source, &group, target_size) {
            chunks.push(sub);
        }
    }
    Ok(chunks)
}

/// Slices `revs` until the payload/span density of each group reaches
/// `target_density`, skipping only gaps larger than `min_gap_size`.
///
/// Zero-length revisions are folded into the surrounding gap so holes can
/// grow large enough to cut. The largest gaps are cut first, via a
/// max-heap, until the density target is met.
pub fn slice_to_density(
    source: &dyn SpanSource,
    revs: &[i32],
    pending: Option<&PendingDelta>,
    target_density: f64,
    min_gap_size: u64,
) -> Vec<Vec<i32>> {
    if revs.len() <= 1 {
        return vec![revs.to_vec()];
    }

    let next_rev = source.count();
    let next_offset = if next_rev > 0 {
        source.end(next_rev - 1)
    } else {
        0
    };

    let (chain_span, chain_payload) = match pending {
        Some(info) => (info.distance, info.compressed_delta_len),
        None => (
            segment_span(source, revs, None),
            revs.iter().map(|&r| source.length(r)).sum(),
        ),
    };

    if chain_span < min_gap_size {
        return vec![revs.to_vec()];
    }

    let mut density = if chain_span > 0 {
        chain_payload as f64 / chain_span as f64
    } else {
        1.0
    };
    if density >= target_density {
        return vec![revs.to_vec()];
    }

    let mut revs = revs.to_vec();
    if let Some(info) = pending {
        if info.delta_len > 0 {
            revs.push(next_rev);
        }
    }

    // Collect inter-revision gaps, largest first.
    let mut gaps: BinaryHeap<(u64, std::cmp::Reverse<usize>)> = BinaryHeap::new();
    let mut prev_end: Option<u64> = None;
    for (i, &rev) in revs.iter().enumerate() {
        let (rev_start, rev_len) = if rev < next_rev {
            (source.start(rev), source.length(rev))
        } else {
            (next_offset, pending.map_or(0, |info| info.delta_len))
        };

        // Empty revisions merge the holes around them.
        if rev_len == 0 {
            continue;
        }

        if let Some(end) = prev_end {
            let gap = rev_start - end;
            if gap > min_gap_size {
                gaps.push((gap, std::cmp::Reverse(i)));
            }
        }
        prev_end = Some(rev_start + rev_len);
    }

    // Drop the widest holes until the remaining read is dense enough.
    let mut read_data = chain_span;
    let mut cuts = Vec::new();
    while let Some((gap, std::cmp::Reverse(idx))) = gaps.pop() {
        if density >= target_density {
            break;
        }
        cuts.push(idx);
        read_data -= gap;
        density = if read_data > 0 {
            chain_payload as f64 / read_data as f64
        } else {
            1.0
        };
    }
    cuts.sort_unstable();

    let mut chunks = Vec::new();
    let mut prev_idx = 0;
    for idx in cuts {
        let chunk = trim_chunk(source, &revs, prev_idx, idx);
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        prev_idx = idx;
    }
    let chunk = trim_chunk(source, &revs, prev_idx, revs.len());
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

/// Slices `revs` into runs whose spans stay within `target_size`.
///
/// A run's first revision is always kept, even when it alone exceeds the
/// target; it will simply be read on its own.
pub fn slice_to_size(
    source: &dyn SpanSource,
    revs: &[i32],
    target_size: Option<u64>,
) -> Vec<Vec<i32>> {
    let Some(target_size) = target_size else {
        return vec![revs.to_vec()];
    };
    if segment_span(source, revs, None) <= target_size {
        return vec![revs.to_vec()];
    }

    let mut chunks = Vec::new();
    let mut start_idx = 0;
    let mut start_data = source.start(revs[0]);
    let mut end_idx = 0;
    for (idx, &rev) in revs.iter().enumerate().skip(1) {
        let span = source.end(rev) - start_data;
        if span <= target_size {
            end_idx = idx;
        } else {
            let chunk = trim_chunk(source, revs, start_idx, end_idx + 1);
            if !chunk.is_empty() {
                chunks.push(chunk);
            }
            start_idx = idx;
            start_data = source.start(rev);
            end_idx = idx;
        }
    }
    chunks.push(trim_chunk(source, revs, start_idx, revs.len()));
    chunks
}

/// `revs[start_idx..end_idx]` without trailing zero-length revisions.
///
/// The first element of a run is never trimmed, and a trailing virtual
/// (not-yet-written) revision is kept as-is.
fn trim_chunk(source: &dyn SpanSource, revs: &[i32], start_idx: usize, mut end_idx: usize) -> Vec<i32> {
    if end_idx > 0 && revs[end_idx - 1] < source.count() {
        while end_idx > 1 && end_idx > start_idx && source.length(revs[end_idx - 1]) == 0 {
            end_idx -= 1;
        }
    }
    if start_idx >= end_idx {
        return Vec::new();
    }
    revs[start_idx..end_idx].to_vec()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Span source built from cumulative payload boundaries, mirroring the
    /// shape the index exposes.
    pub(crate) struct BoundarySpans(pub Vec<u64>);

    impl SpanSource for BoundarySpans {
        fn start(&self, rev: i32) -> u64 {
            if rev <= 0 {
                0
            } else {
                self.0[rev as usize - 1]
            }
        }
        fn length(&self, rev: i32) -> u64 {
            if rev < 0 {
                0
            } else {
                self.0[rev as usize] - self.start(rev)
            }
        }
        fn count(&self) -> i32 {
            self.0.len() as i32
        }
    }

    fn spans() -> BoundarySpans {
        BoundarySpans(vec![
            5, 10, 12, 12, 27, 31, 31, 42, 47, 47, 48, 51, 74, 85, 86, 91,
        ])
    }

    #[test]
    fn segment_span_covers_first_to_last() {
        let source = BoundarySpans(vec![5, 10, 12, 12, 17]);
        assert_eq!(segment_span(&source, &[0, 1, 2, 3, 4], None), 17);
        assert_eq!(segment_span(&source, &[0, 4], None), 17);
        assert_eq!(segment_span(&source, &[3, 4], None), 5);
        assert_eq!(segment_span(&source, &[1, 2, 3], None), 7);
        assert_eq!(segment_span(&source, &[1, 3], None), 7);
        assert_eq!(segment_span(&source, &[], None), 0);
    }

    #[test]
    fn dense_segment_stays_whole() {
        let source = spans();
        let all: Vec<i32> = (0..16).collect();
        let chunks = slice_to_density(&source, &all, None, 0.5, 0);
        assert_eq!(chunks, vec![all]);
    }

    #[test]
    fn sparse_pairs_are_split() {
        let source = spans();
        let chunks = slice_to_density(&source, &[0, 15], None, 0.5, 0);
        assert_eq!(chunks, vec![vec![0], vec![15]]);
        let chunks = slice_to_density(&source, &[0, 11, 15], None, 0.5, 0);
        assert_eq!(chunks, vec![vec![0], vec![11], vec![15]]);
        let chunks = slice_to_density(&source, &[0, 11, 13, 15], None, 0.5, 0);
        assert_eq!(chunks, vec![vec![0], vec![11, 13, 15]]);
        let chunks = slice_to_density(&source, &[1, 2, 3, 5, 8, 10, 11, 14], None, 0.5, 0);
        assert_eq!(
            chunks,
            vec![vec![1, 2], vec![5, 8, 10, 11], vec![14]]
        );
    }

    #[test]
    fn min_gap_size_keeps_small_holes() {
        let source = spans();
        let chunks = slice_to_density(&source, &[1, 2, 3, 5, 8, 10, 11, 14], None, 0.5, 20);
        assert_eq!(chunks, vec![vec![1, 2, 3, 5, 8, 10, 11], vec![14]]);
        let chunks = slice_to_density(&source, &[1, 2, 3, 5, 8, 10, 11, 14], None, 0.95, 12);
        assert_eq!(
            chunks,
            vec![vec![1, 2], vec![5, 8, 10, 11], vec![14]]
        );
    }

    #[test]
    fn high_density_target_splits_harder() {
        let source = spans();
        let chunks = slice_to_density(&source, &[1, 2, 3, 5, 8, 10, 11, 14], None, 0.95, 0);
        assert_eq!(
            chunks,
            vec![vec![1, 2], vec![5], vec![8, 10, 11], vec![14]]
        );
    }

    #[test]
    fn size_slicing_respects_target() {
        let source = BoundarySpans(vec![3, 5, 6, 8, 8, 11, 12, 13, 14]);
        let cases: Vec<(&[i32], Option<u64>, Vec<Vec<i32>>)> = vec![
            (&[0], Some(3), vec![vec![0]]),
            (&[6, 7], Some(3), vec![vec![6, 7]]),
            (&[0], None, vec![vec![0]]),
            (&[6, 7], None, vec![vec![6, 7]]),
            (&[0, 1], Some(3), vec![vec![0], vec![1]]),
            (&[1, 3], Some(3), vec![vec![1], vec![3]]),
            (&[1, 2, 3], Some(3), vec![vec![1, 2], vec![3]]),
            (&[3, 5], Some(3), vec![vec![3], vec![5]]),
            (&[3, 4, 5], Some(3), vec![vec![3], vec![5]]),
            (&[5, 6, 7, 8], Some(3), vec![vec![5], vec![6, 7, 8]]),
            (
                &[0, 1, 2, 3, 4, 5, 6, 7, 8],
                Some(3),
                vec![vec![0], vec![1, 2], vec![3], vec![5], vec![6, 7, 8]],
            ),
            (&[0, 1], Some(2), vec![vec![0], vec![1]]),
            (&[1, 3], Some(1), vec![vec![1], vec![3]]),
            (&[3, 4, 5], Some(2), vec![vec![3], vec![5]]),
        ];
        for (revs, target, expected) in cases {
            assert_eq!(
                slice_to_size(&source, revs, target),
                expected,
                "revs {revs:?} target {target:?}"
            );
        }
    }

    #[test]
    fn trim_drops_trailing_empties_only() {
        let source = BoundarySpans(vec![5, 10, 12, 12, 17, 21, 21]);
        let revs = [0, 1, 2, 3, 4, 5, 6];
        assert_eq!(trim_chunk(&source, &revs, 0, 7), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(trim_chunk(&source, &revs, 0, 5), vec![0, 1, 2, 3, 4]);
        assert_eq!(trim_chunk(&source, &revs, 0, 4), vec![0, 1, 2]);
        assert_eq!(trim_chunk(&source, &revs, 2, 4), vec![2]);
        assert_eq!(trim_chunk(&source, &revs, 3, 7), vec![3, 4, 5]);
        let sparse = [1, 3, 5, 6];
        assert_eq!(trim_chunk(&source, &sparse, 0, 4), vec![1, 3, 5]);
        assert_eq!(trim_chunk(&source, &sparse, 0, 2), vec![1]);
        assert_eq!(trim_chunk(&source, &sparse, 1, 3), vec![3, 5]);
        assert_eq!(trim_chunk(&source, &sparse, 1, 4), vec![3, 5]);
    }

    #[test]
    fn slice_chunk_composes_density_then_size() {
        let source = spans();
        let all: Vec<i32> = (0..16).collect();
        assert_eq!(
            slice_chunk(&source, &all, None, None, 0.5, 0).unwrap(),
            vec![all]
        );
        assert_eq!(
            slice_chunk(&source, &[0, 15], None, None, 0.5, 0).unwrap(),
            vec![vec![0], vec![15]]
        );
        assert_eq!(
            slice_chunk(&source, &[0, 11, 13, 15], None, None, 0.5, 0).unwrap(),
            vec![vec![0], vec![11, 13, 15]]
        );
        assert_eq!(
            slice_chunk(&source, &[0, 11, 13, 15], None, Some(15), 0.5, 0).unwrap(),
            vec![vec![0], vec![11], vec![13], vec![15]]
        );
    }

    #[test]
    fn target_size_with_pending_delta_is_rejected() {
        let source = spans();
        let pending = PendingDelta {
            delta_len: 4,
            compressed_delta_len: 10,
            distance: 30,
        };
        let err =
            slice_chunk(&source, &[0, 1], Some(&pending), Some(16), 0.5, 0).unwrap_err();
        assert!(matches!(err, RevlogError::InvalidArgument(_)));
    }
}
