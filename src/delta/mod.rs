//! Delta-base selection and full-text construction.
//!
//! Appending a revision means choosing between a full snapshot and a delta
//! against some earlier revision. [`DeltaComputer::find_delta_info`] walks
//! ordered candidate groups (cached hint, parents, previous revision),
//! builds a delta per viable candidate and scores it with
//! [`DeltaComputer::is_good_delta_info`], which bounds read distance,
//! delta size, cumulative chain payload, chain length, and intermediate
//! snapshot growth. The first group with an accepted candidate wins; its
//! smallest delta is kept. Everything failing that, the revision is stored
//! as a full snapshot.

use smallvec::SmallVec;
use tracing::trace;

use crate::diff;
use crate::error::{Result, RevlogError};
use crate::flags::{RAWTEXT_CHANGING_FLAGS, REVISION_FLAG_CENSORED};
use crate::node::{NodeId, NULL_REV};
use crate::revlog::Revlog;
use crate::slice::{segment_span, slice_chunk, PendingDelta, SpanSource};

/// Maximum cumulative chain payload, as a multiple of the text length.
const LIMIT_DELTA_TO_TEXT: u64 = 2;

/// Candidates whose stored length exceeds this multiple of the new text
/// length can never pay off and are skipped without building a delta.
const CANDIDATE_SIZE_LIMIT: u64 = 4;

/// Everything known about a revision being appended.
#[derive(Debug)]
pub struct RevisionInfo {
    /// Externally computed node of the new revision.
    pub node: NodeId,
    /// First parent node.
    pub p1: NodeId,
    /// Second parent node.
    pub p2: NodeId,
    /// Raw text, when the caller has it; filled in lazily from the cached
    /// delta otherwise.
    pub btext: Option<Vec<u8>>,
    /// Raw text length.
    pub textlen: usize,
    /// Caller-supplied `(base_rev, delta)` hint, e.g. from a transfer.
    pub cached_delta: Option<(i32, Vec<u8>)>,
    /// Content-transform flag bits.
    pub flags: u16,
}

/// A scored candidate for how to store a new revision. Transient; never
/// persisted.
#[derive(Debug, Clone)]
pub struct DeltaInfo {
    /// Bytes that must be read to materialize this candidate.
    pub distance: u64,
    /// Encoded (compressed) payload length.
    pub delta_len: u64,
    /// The encoded payload itself.
    pub data: Vec<u8>,
    /// Chosen delta base (the revision itself, conceptually, for a full
    /// snapshot).
    pub base: i32,
    /// Snapshot revision the chain starts from.
    pub chain_base: i32,
    /// Number of links in the resulting chain.
    pub chain_len: u32,
    /// Cumulative stored payload along the resulting chain.
    pub compressed_delta_len: u64,
    /// Depth of the base snapshot chain when the base is a non-degenerate
    /// snapshot; `None` for ordinary deltas.
    pub snapshot_depth: Option<u32>,
}

impl DeltaInfo {
    fn pending(&self) -> PendingDelta {
        PendingDelta {
            delta_len: self.delta_len,
            compressed_delta_len: self.compressed_delta_len,
            distance: self.distance,
        }
    }
}

type CandidateGroup = SmallVec<[i32; 2]>;

/// Revisions worth diffing against, grouped by level of preference.
///
/// Group order: the caller-supplied hint (general-delta only), the
/// parents (closest first when trying them separately), then the previous
/// revision as a last resort.
fn candidate_groups(
    revlog: &mut Revlog,
    p1: &NodeId,
    p2: &NodeId,
    cached_base: Option<i32>,
) -> Result<Vec<CandidateGroup>> {
    let prev = revlog.len() as i32 - 1;
    if prev == NULL_REV || !revlog.config().store_delta_chains {
        return Ok(Vec::new());
    }

    let general_delta = revlog.config().general_delta;
    let p1r = revlog.index_mut().get_rev(p1).unwrap_or(NULL_REV);
    let p2r = revlog.index_mut().get_rev(p2).unwrap_or(NULL_REV);

    let mut groups: Vec<CandidateGroup> = Vec::new();
    let mut tested: SmallVec<[i32; 4]> = SmallVec::new();

    if let Some(base) = cached_base {
        if general_delta && revlog.config().lazy_delta_base && base != NULL_REV {
            groups.push(SmallVec::from_slice(&[base]));
            tested.push(base);
        }
    }

    if general_delta {
        let mut parents: CandidateGroup = [p1r, p2r]
            .into_iter()
            .filter(|p| *p != NULL_REV && !tested.contains(p))
            .collect();
        if !revlog.config().delta_both_parents && parents.len() == 2 {
            parents.sort_unstable();
            // The higher-numbered parent is closest on disk; a delta against
            // it has the best chance of avoiding a full text.
            groups.push(SmallVec::from_slice(&[parents[1]]));
            groups.push(SmallVec::from_slice(&[parents[0]]));
            tested.extend_from_slice(&parents);
        } else if !parents.is_empty() {
            tested.extend_from_slice(&parents);
            groups.push(parents);
        }
    }

    if !tested.contains(&prev) {
        groups.push(SmallVec::from_slice(&[prev]));
    }
    Ok(groups)
}

/// Finds how to store new revisions against an existing revlog.
pub struct DeltaComputer<'a> {
    revlog: &'a mut Revlog,
}

impl<'a> DeltaComputer<'a> {
    /// Creates a computer bound to `revlog`.
    pub fn new(revlog: &'a mut Revlog) -> Self {
        Self { revlog }
    }

    /// Builds the raw text of the revision described by `info`, from its
    /// cached delta if the text is not already known.
    ///
    /// A delta replacing its entire base short-circuits base decoding,
    /// which keeps censored bases (whose real bytes are unreadable) usable
    /// as chain links.
    pub fn build_text(&mut self, info: &mut RevisionInfo) -> Result<Vec<u8>> {
        if let Some(text) = &info.btext {
            return Ok(text.clone());
        }
        let (base_rev, delta) = info
            .cached_delta
            .as_ref()
            .ok_or_else(|| {
                RevlogError::InvalidArgument("revision needs either text or a cached delta".into())
            })?
            .clone();

        let base_size = self.revlog.rawsize(base_rev)?;
        let fulltext = if diff::is_replacement_diff(&delta, base_size) {
            delta[diff::HUNK_HEADER_SIZE..].to_vec()
        } else {
            let base_text = self.revlog.rawdata(base_rev)?;
            diff::patch(&base_text, &delta)?
        };

        let checked = (|| -> Result<()> {
            let trusted = self.revlog.flag_registry().apply_raw(&fulltext, info.flags)?;
            if trusted {
                self.revlog
                    .check_hash(&fulltext, &info.node, &info.p1, &info.p2)?;
            }
            if info.flags & REVISION_FLAG_CENSORED != 0 {
                return Err(RevlogError::CorruptFormat(
                    "revision flagged censored but its content verifies".into(),
                ));
            }
            Ok(())
        })();
        match checked {
            // A failed hash over a tombstone is exactly what a censored
            // revision looks like; only tolerate it when the flag says so.
            Err(RevlogError::CensoredContent(_))
                if info.flags & REVISION_FLAG_CENSORED != 0 => {}
            Err(err) => return Err(err),
            Ok(()) => {}
        }

        info.textlen = fulltext.len();
        info.btext = Some(fulltext.clone());
        Ok(fulltext)
    }

    fn build_delta_diff(&mut self, base: i32, info: &mut RevisionInfo) -> Result<Vec<u8>> {
        let text = self.build_text(info)?;
        if self.revlog.is_censored(base)? {
            // Deltas on a censored base must replace the full content in
            // one hunk, so reconstruction works everywhere.
            let header = diff::replace_diff_header(self.revlog.rawsize(base)?, text.len())?;
            let mut delta = header.to_vec();
            delta.extend_from_slice(&text);
            Ok(delta)
        } else {
            let base_text = self.revlog.rawdata(base)?;
            diff::text_diff(&base_text, &text)
        }
    }

    fn build_delta_info(&mut self, info: &mut RevisionInfo, base: i32) -> Result<DeltaInfo> {
        let delta = match &info.cached_delta {
            Some((cached_base, delta)) if *cached_base == base => delta.clone(),
            _ => self.build_delta_diff(base, info)?,
        };
        let data = self.revlog.compress(&delta)?;
        let delta_len = data.len() as u64;

        let chain_base = self.revlog.chain_base(base)?;
        let offset = {
            let last = self.revlog.len() as i32 - 1;
            self.revlog.index().end(last)
        };
        let distance = delta_len + offset - self.revlog.index().start(chain_base);

        let general_delta = self.revlog.config().general_delta;
        let delta_base = if general_delta { base } else { chain_base };
        let (mut chain_len, mut compressed_delta_len) = self.revlog.chain_info(base)?;
        chain_len += 1;
        compressed_delta_len += delta_len;

        let snapshot_depth = if delta_base == NULL_REV {
            Some(0)
        } else if self.revlog.config().sparse_revlog && self.revlog.is_snapshot(delta_base)? {
            // A chain should be one full snapshot, zero or more
            // semi-snapshots, then deltas; only a non-parent snapshot base
            // makes the new revision a deeper snapshot.
            let p1r = self.revlog.index_mut().get_rev(&info.p1).unwrap_or(NULL_REV);
            let p2r = self.revlog.index_mut().get_rev(&info.p2).unwrap_or(NULL_REV);
            if delta_base != p1r && delta_base != p2r {
                let (chain, _) = self.revlog.delta_chain(delta_base, None)?;
                Some(chain.len() as u32)
            } else {
                None
            }
        } else {
            None
        };

        Ok(DeltaInfo {
            distance,
            delta_len,
            data,
            base: delta_base,
            chain_base,
            chain_len,
            compressed_delta_len,
            snapshot_depth,
        })
    }

    fn full_snapshot_info(&mut self, info: &mut RevisionInfo) -> Result<DeltaInfo> {
        let curr = self.revlog.len() as i32;
        let rawtext = self.build_text(info)?;
        let data = self.revlog.compress(&rawtext)?;
        let size = data.len() as u64;
        Ok(DeltaInfo {
            distance: size,
            delta_len: size,
            data,
            base: curr,
            chain_base: curr,
            chain_len: 1,
            compressed_delta_len: size,
            snapshot_depth: Some(0),
        })
    }

    /// True when storing `candidate` keeps the revlog within its read- and
    /// chain-cost bounds.
    pub fn is_good_delta_info(
        &mut self,
        candidate: &DeltaInfo,
        info: &RevisionInfo,
    ) -> Result<bool> {
        let config = self.revlog.config().clone();
        let textlen = info.textlen as u64;

        let distance = if config.sparse_revlog {
            // With sparse reads the cost is the largest single read chunk,
            // not the span of the whole chain.
            let chain = if candidate.base == NULL_REV {
                Vec::new()
            } else {
                let (chain, _) = self.revlog.delta_chain(candidate.base, None)?;
                let first_delta = chain
                    .iter()
                    .position(|&r| !self.revlog.is_snapshot(r).unwrap_or(false))
                    .unwrap_or(chain.len().saturating_sub(1));
                chain[first_delta..].to_vec()
            };
            let pending = candidate.pending();
            let chunks = slice_chunk(
                self.revlog.index(),
                &chain,
                Some(&pending),
                None,
                config.sr_density_threshold,
                config.sr_min_gap_size,
            )?;
            chunks
                .iter()
                .map(|revs| segment_span(self.revlog.index(), revs, Some(&pending)))
                .max()
                .unwrap_or(0)
        } else {
            candidate.distance
        };

        let default_max = textlen * 4;
        let mut max_dist = config.max_deltachain_span;
        if max_dist == 0 {
            max_dist = distance;
        }
        max_dist = max_dist.max(default_max);
        if config.sparse_revlog && max_dist < config.sr_min_gap_size {
            // Data ranges below the gap floor are read through anyway;
            // relax the span constraint to match.
            max_dist = config.sr_min_gap_size;
        }

        // Bad delta from read span: more I/O than allowed.
        if max_dist < distance {
            return Ok(false);
        }
        // Bad delta from delta size: no space saved over a snapshot.
        if textlen < candidate.delta_len {
            return Ok(false);
        }
        // Bad delta from cumulated payload: the chain costs too much CPU.
        if textlen * LIMIT_DELTA_TO_TEXT < candidate.compressed_delta_len {
            return Ok(false);
        }
        // Bad delta from chain length.
        if let Some(max_chain) = config.max_chain_len {
            if max_chain < candidate.chain_len {
                return Ok(false);
            }
        }
        // Bad delta from intermediate snapshot size: an ever-deeper stack
        // of snapshots must shrink geometrically.
        if let Some(depth) = candidate.snapshot_depth {
            if (textlen >> depth) < candidate.delta_len {
                return Ok(false);
            }
            // Never build a bigger delta on top of a smaller snapshot.
            if depth > 0 && self.revlog.index().length(candidate.base) < candidate.delta_len {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Finds an acceptable delta against a candidate revision, or a full
    /// snapshot when nothing qualifies.
    ///
    /// Returns the first acceptable candidate in [`candidate_groups`]
    /// order, keeping the smallest encoded delta within the winning group.
    pub fn find_delta_info(&mut self, info: &mut RevisionInfo) -> Result<DeltaInfo> {
        // Empty text is always a (trivial) full snapshot, even when it only
        // arrived as a delta to apply.
        if info.textlen == 0 {
            return self.full_snapshot_info(info);
        }
        // No deltas for raw-text-changing revisions: their stored bytes
        // are not a faithful diff target.
        if info.flags & RAWTEXT_CHANGING_FLAGS != 0 {
            return self.full_snapshot_info(info);
        }

        let cached_base = info.cached_delta.as_ref().map(|(base, _)| *base);
        let (p1, p2) = (info.p1, info.p2);
        let groups = candidate_groups(self.revlog, &p1, &p2, cached_base)?;
        let size_limit = info.textlen as u64 * CANDIDATE_SIZE_LIMIT;

        for group in groups {
            let mut best: Option<DeltaInfo> = None;
            for mut candidate in group {
                // Hop over empty deltas; they are not worth chaining on.
                while candidate != NULL_REV && self.revlog.index().length(candidate) == 0 {
                    candidate = self.revlog.delta_parent(candidate)?;
                }
                if candidate == NULL_REV {
                    continue;
                }
                if self.revlog.flags(candidate)? & RAWTEXT_CHANGING_FLAGS != 0 {
                    continue;
                }
                if self.revlog.index().length(candidate) > size_limit {
                    trace!(candidate, "skipping oversized delta candidate");
                    continue;
                }
                let built = self.build_delta_info(info, candidate)?;
                if self.is_good_delta_info(&built, info)? {
                    let better = best
                        .as_ref()
                        .map_or(true, |b| built.delta_len < b.delta_len);
                    if better {
                        best = Some(built);
                    }
                }
            }
            if let Some(chosen) = best {
                trace!(
                    base = chosen.base,
                    delta_len = chosen.delta_len,
                    chain_len = chosen.chain_len,
                    "accepted delta candidate"
                );
                return Ok(chosen);
            }
        }

        trace!("no acceptable delta base, storing a full snapshot");
        self.full_snapshot_info(info)
    }
}
