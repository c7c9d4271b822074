//! The revision log engine.
//!
//! A [`Revlog`] stores an append-only sequence of revisions, each one a
//! full snapshot or a delta against an earlier revision, addressed by
//! revision number or by 20-byte node hash. Two files back a log named
//! `foo`: `foo.i` holds fixed-size index records and `foo.d` the payload
//! bytes; the inline layout interleaves both in `foo.i` alone for small
//! logs.
//!
//! The engine never computes node hashes on its own authority: the hash
//! function comes from the embedder through [`NodeHasher`], and stored
//! hashes are verified on read unless a flag transform says the bytes
//! cannot be trusted for hashing.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::config::RevlogConfig;
use crate::delta::{DeltaComputer, DeltaInfo, RevisionInfo};
use crate::diff;
use crate::error::{Result, RevlogError};
use crate::flags::{FlagRegistry, REVISION_FLAG_CENSORED};
use crate::index::{
    CompressionMode, Index, IndexEntry, IndexVersion, FLAG_GENERAL_DELTA, FLAG_INLINE_DATA,
};
use crate::node::{NodeHasher, NodeId, NULL_REV};
use crate::slice::{slice_chunk, SpanSource};

/// Envelope prefix for snappy-compressed payloads.
const COMP_MODE_SNAPPY: u8 = b's';
/// Envelope prefix for payloads stored verbatim.
const COMP_MODE_PLAIN: u8 = b'u';

/// Leading marker of the tombstone text a censored revision stores in
/// place of its real content.
pub const CENSOR_TOMBSTONE_PREFIX: &[u8] = b"censored:";

/// One append-only revision log.
pub struct Revlog {
    index_path: PathBuf,
    data_path: PathBuf,
    index: Index,
    config: RevlogConfig,
    inline: bool,
    general_delta: bool,
    registry: FlagRegistry,
    hasher: Box<dyn NodeHasher>,
    /// Single-entry raw text cache: `(rev, rawtext)`.
    text_cache: Option<(i32, Vec<u8>)>,
}

impl std::fmt::Debug for Revlog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Revlog")
            .field("index_path", &self.index_path)
            .field("len", &self.index.len())
            .field("inline", &self.inline)
            .field("general_delta", &self.general_delta)
            .finish()
    }
}

impl Revlog {
    /// Opens (or creates) the log rooted at `path`; the index lives at
    /// `<path>.i` and, for the separate layout, payload at `<path>.d`.
    ///
    /// An existing V1 index announces its own layout in the header word,
    /// which then overrides the configured `inline` and `general_delta`.
    pub fn open(
        path: impl AsRef<Path>,
        config: RevlogConfig,
        hasher: Box<dyn NodeHasher>,
    ) -> Result<Self> {
        let index_path = with_suffix(path.as_ref(), ".i");
        let data_path = with_suffix(path.as_ref(), ".d");

        let version = config.version;
        if config.inline && version != IndexVersion::V1 {
            return Err(RevlogError::InvalidArgument(
                "the inline layout exists only in index format v1".into(),
            ));
        }
        let mut inline = config.inline;
        let mut general_delta = config.general_delta && version != IndexVersion::V0;

        let image = match std::fs::read(&index_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let index = if image.is_empty() {
            Index::new(version)
        } else {
            if version == IndexVersion::V1 {
                let word = header_word_of(&image)?;
                let found = word & 0xFFFF;
                if found != version.header_version() {
                    return Err(RevlogError::CorruptFormat(format!(
                        "unknown index format version {found}"
                    )));
                }
                inline = word & FLAG_INLINE_DATA != 0;
                general_delta = word & FLAG_GENERAL_DELTA != 0;
            }
            Index::parse(version, inline, &image)?
        };

        debug!(
            path = %index_path.display(),
            revisions = index.len(),
            inline,
            general_delta,
            "opened revlog"
        );
        Ok(Self {
            index_path,
            data_path,
            index,
            config,
            inline,
            general_delta,
            registry: FlagRegistry::new(),
            hasher,
            text_cache: None,
        })
    }

    /// Number of revisions.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the log holds no revision.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The configuration this log was opened with. `inline` and
    /// `general_delta` as actually in effect are reflected here.
    pub fn config(&self) -> &RevlogConfig {
        &self.config
    }

    /// Whether this log uses the interleaved single-file layout.
    pub fn is_inline(&self) -> bool {
        self.inline
    }

    /// Shared access to the index.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Mutable access to the index, for nodemap-backed lookups.
    pub fn index_mut(&mut self) -> &mut Index {
        &mut self.index
    }

    /// The flag-processor registry of this engine instance.
    pub fn flag_registry(&self) -> &FlagRegistry {
        &self.registry
    }

    /// Mutable registry access, for registering processors.
    pub fn flag_registry_mut(&mut self) -> &mut FlagRegistry {
        &mut self.registry
    }

    /// Node hash of `rev`.
    pub fn node(&self, rev: i32) -> Result<NodeId> {
        Ok(self.index.get(rev)?.node)
    }

    /// Revision number of `node`.
    pub fn rev(&mut self, node: &NodeId) -> Result<i32> {
        self.index.rev(node)
    }

    /// True when `node` exists in this log.
    pub fn has_node(&mut self, node: &NodeId) -> bool {
        self.index.has_node(node)
    }

    /// Parent revision numbers of `rev`.
    pub fn parent_revs(&self, rev: i32) -> Result<(i32, i32)> {
        let entry = self.index.get(rev)?;
        Ok((entry.p1_rev, entry.p2_rev))
    }

    /// External log entry `rev` is bound to.
    pub fn link_rev(&self, rev: i32) -> Result<i32> {
        Ok(self.index.get(rev)?.link_rev)
    }

    /// Content-transform flag bits of `rev`.
    pub fn flags(&self, rev: i32) -> Result<u16> {
        Ok(self.index.get(rev)?.flags)
    }

    /// Logical raw text length of `rev`.
    ///
    /// V0 records may store `-1` for an unknown length; the text is then
    /// reconstructed to measure it.
    pub fn rawsize(&mut self, rev: i32) -> Result<usize> {
        let len = self.index.get(rev)?.uncompressed_len;
        if len >= 0 {
            return Ok(len as usize);
        }
        Ok(self.rawdata(rev)?.len())
    }

    /// True when `rev` carries the censored flag.
    pub fn is_censored(&self, rev: i32) -> Result<bool> {
        Ok(self.flags(rev)? & REVISION_FLAG_CENSORED != 0)
    }

    /// Delta base of `rev`, or the null revision for a full snapshot.
    pub fn delta_parent(&self, rev: i32) -> Result<i32> {
        if rev == NULL_REV {
            return Ok(NULL_REV);
        }
        let base = self.index.get(rev)?.base_rev;
        if base == rev {
            Ok(NULL_REV)
        } else if self.general_delta {
            Ok(base)
        } else {
            Ok(rev - 1)
        }
    }

    /// First revision of the chain `rev` belongs to.
    pub fn chain_base(&self, rev: i32) -> Result<i32> {
        let mut iter_rev = rev;
        let mut base = self.index.get(iter_rev)?.base_rev;
        while base != iter_rev {
            iter_rev = base;
            base = self.index.get(iter_rev)?.base_rev;
        }
        Ok(base)
    }

    /// Delta chain ending at `rev`, oldest link first.
    ///
    /// Walks base pointers until a self-based snapshot, the null revision,
    /// or `stop_rev`. The second return value reports whether `stop_rev`
    /// cut the walk short, in which case the chain excludes it.
    pub fn delta_chain(&self, rev: i32, stop_rev: Option<i32>) -> Result<(Vec<i32>, bool)> {
        let mut chain = Vec::new();
        let mut iter_rev = rev;
        let mut entry = self.index.get(iter_rev)?;
        let stopped = loop {
            if Some(iter_rev) == stop_rev {
                break true;
            }
            if entry.base_rev == iter_rev || iter_rev == NULL_REV {
                chain.push(iter_rev);
                break false;
            }
            chain.push(iter_rev);
            iter_rev = if self.general_delta {
                entry.base_rev
            } else {
                iter_rev - 1
            };
            entry = self.index.get(iter_rev)?;
        };
        chain.reverse();
        Ok((chain, stopped))
    }

    /// `(chain length, cumulative stored payload)` for the chain ending at
    /// `rev`.
    pub fn chain_info(&self, rev: i32) -> Result<(u32, u64)> {
        if rev == NULL_REV {
            return Ok((0, 0));
        }
        let (chain, _) = self.delta_chain(rev, None)?;
        let mut payload = 0u64;
        for &r in &chain {
            payload += self.index.length(r);
        }
        Ok((chain.len() as u32, payload))
    }

    /// True when `rev` is a snapshot: a full one, or (with sparse chains)
    /// an intermediate snapshot whose base is itself a non-parent snapshot.
    pub fn is_snapshot(&self, rev: i32) -> Result<bool> {
        if rev == NULL_REV {
            return Ok(true);
        }
        let delta_parent = self.delta_parent(rev)?;
        if delta_parent == NULL_REV {
            return Ok(true);
        }
        if !self.config.sparse_revlog {
            return Ok(false);
        }
        let entry = self.index.get(rev)?;
        if delta_parent == entry.p1_rev || delta_parent == entry.p2_rev {
            return Ok(false);
        }
        self.is_snapshot(delta_parent)
    }

    /// Wraps payload bytes in the storage envelope, compressing when that
    /// actually saves space.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let compressed = snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(std::io::Error::other)?;
        let mut out;
        if compressed.len() < data.len() {
            out = Vec::with_capacity(1 + compressed.len());
            out.push(COMP_MODE_SNAPPY);
            out.extend_from_slice(&compressed);
        } else {
            out = Vec::with_capacity(1 + data.len());
            out.push(COMP_MODE_PLAIN);
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    /// Unwraps the storage envelope produced by [`compress`](Self::compress).
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match data.first() {
            None => Ok(Vec::new()),
            Some(&COMP_MODE_PLAIN) => Ok(data[1..].to_vec()),
            Some(&COMP_MODE_SNAPPY) => snap::raw::Decoder::new()
                .decompress_vec(&data[1..])
                .map_err(|err| {
                    RevlogError::CorruptFormat(format!("undecodable payload: {err}"))
                }),
            // A zero byte marks a payload stored with no envelope at all.
            Some(0) => Ok(data.to_vec()),
            Some(other) => Err(RevlogError::CorruptFormat(format!(
                "unknown compression header 0x{other:02x}"
            ))),
        }
    }

    fn physical_offset(&self, rev: i32, entry: &IndexEntry) -> u64 {
        if self.inline {
            // Records and payload interleave, so the payload of rev sits
            // after rev+1 records worth of index bytes.
            entry.offset + (rev as u64 + 1) * self.index.version().entry_size() as u64
        } else {
            entry.offset
        }
    }

    fn read_segment(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let path = if self.inline {
            &self.index_path
        } else {
            &self.data_path
        };
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Decoded stored payload of `rev`: the full snapshot or the delta,
    /// exactly as it went in.
    pub fn chunk(&self, rev: i32) -> Result<Vec<u8>> {
        let entry = *self.index.get(rev)?;
        let len = usize::try_from(entry.compressed_len).map_err(|_| {
            RevlogError::CorruptFormat(format!("negative stored length on revision {rev}"))
        })?;
        let data = self.read_segment(self.physical_offset(rev, &entry), len)?;
        match entry.data_comp_mode {
            CompressionMode::Plain => Ok(data),
            CompressionMode::Default => snap::raw::Decoder::new()
                .decompress_vec(&data)
                .map_err(|err| {
                    RevlogError::CorruptFormat(format!("undecodable payload: {err}"))
                }),
            CompressionMode::Inline => self.decompress(&data),
        }
    }

    /// Raw stored text of `rev`: the delta chain applied, before any read
    /// transforms and without hash verification.
    pub fn rawdata(&mut self, rev: i32) -> Result<Vec<u8>> {
        if rev == NULL_REV {
            return Ok(Vec::new());
        }
        if let Some((cached_rev, text)) = &self.text_cache {
            if *cached_rev == rev {
                return Ok(text.clone());
            }
        }

        let cached_rev = self.text_cache.as_ref().map(|(r, _)| *r);
        let (chain, stopped) = self.delta_chain(rev, cached_rev)?;
        let (mut text, deltas) = if stopped {
            let (_, cached) = self
                .text_cache
                .as_ref()
                .ok_or_else(|| RevlogError::CorruptFormat("chain stop without a cache".into()))?;
            (cached.clone(), &chain[..])
        } else {
            (self.chunk(chain[0])?, &chain[1..])
        };
        for &delta_rev in deltas {
            let delta = self.chunk(delta_rev)?;
            text = diff::patch(&text, &delta)?;
        }

        self.text_cache = Some((rev, text.clone()));
        Ok(text)
    }

    /// Logical text of `rev`: read transforms applied, hash verified.
    pub fn revision(&mut self, rev: i32) -> Result<Vec<u8>> {
        self.revision_inner(rev, false)
    }

    /// Raw text of `rev` with hash verification (where the raw-trust
    /// predicates allow it), but without read transforms.
    pub fn raw_revision(&mut self, rev: i32) -> Result<Vec<u8>> {
        self.revision_inner(rev, true)
    }

    fn revision_inner(&mut self, rev: i32, raw: bool) -> Result<Vec<u8>> {
        let rawtext = self.rawdata(rev)?;
        let flags = self.flags(rev)?;
        let (text, trusted) = if raw {
            let trusted = self.registry.apply_raw(&rawtext, flags)?;
            (rawtext, trusted)
        } else {
            let (text, trusted, _aux) = self.registry.apply_read(&rawtext, flags)?;
            (text, trusted)
        };
        if trusted {
            let entry = self.index.get(rev)?;
            let (node, p1r, p2r) = (entry.node, entry.p1_rev, entry.p2_rev);
            let p1 = self.node(p1r)?;
            let p2 = self.node(p2r)?;
            self.check_hash(&text, &node, &p1, &p2)?;
        }
        Ok(text)
    }

    /// Verifies that `text` with parents `(p1, p2)` hashes to `node`.
    ///
    /// A mismatch against a node whose stored revision carries the
    /// censored flag reports [`RevlogError::CensoredContent`] instead of a
    /// plain integrity failure.
    pub fn check_hash(
        &mut self,
        text: &[u8],
        node: &NodeId,
        p1: &NodeId,
        p2: &NodeId,
    ) -> Result<()> {
        if self.hasher.node_id(text, p1, p2) == *node {
            return Ok(());
        }
        if let Some(rev) = self.index.get_rev(node) {
            if rev != NULL_REV && self.is_censored(rev)? {
                return Err(RevlogError::CensoredContent(format!(
                    "revision {rev} is censored"
                )));
            }
        }
        // Not-yet-stored censored content only announces itself through
        // its tombstone text.
        if text.starts_with(CENSOR_TOMBSTONE_PREFIX) {
            return Err(RevlogError::CensoredContent(
                "tombstone text in place of real content".into(),
            ));
        }
        Err(RevlogError::CorruptFormat(
            "integrity check failed: content does not hash to its node".into(),
        ))
    }

    /// Delta transforming `rev1`'s raw text into `rev2`'s.
    ///
    /// The stored delta is returned verbatim when `rev2` happens to be a
    /// delta against `rev1`.
    pub fn rev_diff(&mut self, rev1: i32, rev2: i32) -> Result<Vec<u8>> {
        if rev1 != NULL_REV && self.delta_parent(rev2)? == rev1 {
            return self.chunk(rev2);
        }
        let old = self.rawdata(rev1)?;
        let new = self.rawdata(rev2)?;
        diff::text_diff(&old, &new)
    }

    /// Splits sorted `revs` into groups worth reading in one call each,
    /// per the sparse-read configuration.
    pub fn slice_revs(&self, revs: &[i32], target_size: Option<u64>) -> Result<Vec<Vec<i32>>> {
        if !self.config.sparse_revlog {
            return Ok(vec![revs.to_vec()]);
        }
        slice_chunk(
            &self.index,
            revs,
            None,
            target_size,
            self.config.sr_density_threshold,
            self.config.sr_min_gap_size,
        )
    }

    /// Appends one revision and returns `(rev, node)`.
    ///
    /// `text` is the logical text; write transforms for `flags` map it to
    /// stored raw bytes first. The node is computed over the raw bytes
    /// unless the caller supplies one (required for revisions whose raw
    /// bytes do not hash, such as censored tombstones). Appending a node
    /// the log already holds returns the existing revision untouched.
    pub fn add_revision(
        &mut self,
        text: &[u8],
        link_rev: i32,
        p1: &NodeId,
        p2: &NodeId,
        flags: u16,
        node: Option<NodeId>,
        cached_delta: Option<(i32, Vec<u8>)>,
    ) -> Result<(i32, NodeId)> {
        if flags != 0 && !self.index.version().supports_flags() {
            return Err(RevlogError::InvalidArgument(
                "revision flags need index format v1 or later".into(),
            ));
        }
        if let Some((base, _)) = &cached_delta {
            if *base != NULL_REV && self.index.get(*base).is_err() {
                return Err(RevlogError::InvalidArgument(format!(
                    "cached delta base {base} out of range"
                )));
            }
        }

        let (rawtext, trusted) = self.registry.apply_write(text, flags)?;
        let node = node.unwrap_or_else(|| {
            // With transforming flags the node covers the logical text; the
            // raw bytes are a storage detail.
            if flags == 0 {
                self.hasher.node_id(&rawtext, p1, p2)
            } else {
                self.hasher.node_id(text, p1, p2)
            }
        });
        if trusted && flags & REVISION_FLAG_CENSORED == 0 {
            self.check_hash(&rawtext, &node, p1, p2)?;
        }
        if let Some(rev) = self.index.get_rev(&node) {
            trace!(rev, "revision already present");
            return Ok((rev, node));
        }

        // A caller-supplied delta describes the logical text; once a write
        // transform changed the bytes it no longer applies.
        let cached_delta = if rawtext.as_slice() == text {
            cached_delta
        } else {
            None
        };

        let p1_rev = self.index.rev(p1)?;
        let p2_rev = self.index.rev(p2)?;
        let textlen = rawtext.len();
        let mut info = RevisionInfo {
            node,
            p1: *p1,
            p2: *p2,
            btext: Some(rawtext),
            textlen,
            cached_delta,
            flags,
        };
        let delta = DeltaComputer::new(self).find_delta_info(&mut info)?;
        let rev = self.store_revision(&info, link_rev, p1_rev, p2_rev, delta)?;
        Ok((rev, node))
    }

    /// Appends a revision known only as a delta against `base_rev`, as
    /// received from a transfer.
    ///
    /// The text is reconstructed (and verified against `node`) only when
    /// the delta policy rejects every candidate base and a full snapshot
    /// has to be stored, or when verification demands it.
    pub fn add_delta(
        &mut self,
        node: NodeId,
        link_rev: i32,
        p1: &NodeId,
        p2: &NodeId,
        flags: u16,
        base_rev: i32,
        delta: Vec<u8>,
    ) -> Result<i32> {
        if flags != 0 && !self.index.version().supports_flags() {
            return Err(RevlogError::InvalidArgument(
                "revision flags need index format v1 or later".into(),
            ));
        }
        if let Some(rev) = self.index.get_rev(&node) {
            trace!(rev, "revision already present");
            return Ok(rev);
        }
        self.index.get(base_rev)?;
        let p1_rev = self.index.rev(p1)?;
        let p2_rev = self.index.rev(p2)?;

        let base_size = self.rawsize(base_rev)?;
        let textlen = diff::patched_size(base_size, &delta)?;
        let mut info = RevisionInfo {
            node,
            p1: *p1,
            p2: *p2,
            btext: None,
            textlen,
            cached_delta: Some((base_rev, delta)),
            flags,
        };
        let delta_info = DeltaComputer::new(self).find_delta_info(&mut info)?;
        self.store_revision(&info, link_rev, p1_rev, p2_rev, delta_info)
    }

    fn header_word(&self) -> u32 {
        let mut word = self.index.version().header_version();
        if self.inline {
            word |= FLAG_INLINE_DATA;
        }
        if self.general_delta {
            word |= FLAG_GENERAL_DELTA;
        }
        word
    }

    fn store_revision(
        &mut self,
        info: &RevisionInfo,
        link_rev: i32,
        p1_rev: i32,
        p2_rev: i32,
        delta: DeltaInfo,
    ) -> Result<i32> {
        let rev = self.index.len() as i32;
        let offset = self.index.end(rev - 1);
        let compressed_len = i32::try_from(delta.data.len()).map_err(|_| {
            RevlogError::InvalidArgument("stored payload does not fit a record".into())
        })?;
        let uncompressed_len = i32::try_from(info.textlen).map_err(|_| {
            RevlogError::InvalidArgument("text length does not fit a record".into())
        })?;

        self.index.append(IndexEntry {
            offset,
            flags: info.flags,
            compressed_len,
            uncompressed_len,
            base_rev: delta.base,
            link_rev,
            p1_rev,
            p2_rev,
            node: info.node,
            ..IndexEntry::null()
        });

        let written = self.write_record(rev, &delta.data);
        if let Err(err) = written {
            // Index and files must stay consistent; drop the in-memory
            // entry again before surfacing the failure.
            let _ = self.index.truncate(rev);
            return Err(err);
        }

        if let Some(text) = &info.btext {
            self.text_cache = Some((rev, text.clone()));
        }
        trace!(
            rev,
            base = delta.base,
            stored = delta.data.len(),
            raw = info.textlen,
            "appended revision"
        );
        Ok(rev)
    }

    fn write_record(&mut self, rev: i32, payload: &[u8]) -> Result<()> {
        let mut record = Vec::new();
        if rev == 0 && self.index.version() == IndexVersion::V1 {
            record.extend_from_slice(&self.index.pack_header(self.header_word())?);
        }
        record.extend_from_slice(&self.index.entry_binary(rev)?);

        let mut index_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index_path)?;
        let index_len = index_file.metadata()?.len();

        if self.inline {
            record.extend_from_slice(payload);
            if let Err(err) = index_file.write_all(&record) {
                let _ = index_file.set_len(index_len);
                return Err(err.into());
            }
            return Ok(());
        }

        let mut data_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.data_path)?;
        let data_len = data_file.metadata()?.len();
        let result = index_file
            .write_all(&record)
            .and_then(|_| data_file.write_all(payload));
        if let Err(err) = result {
            let _ = index_file.set_len(index_len);
            let _ = data_file.set_len(data_len);
            return Err(err.into());
        }
        Ok(())
    }

    /// Removes every revision at or after `from_rev`, shrinking the files.
    pub fn truncate(&mut self, from_rev: i32) -> Result<()> {
        let from = usize::try_from(from_rev).map_err(|_| {
            RevlogError::InvalidArgument(format!("cannot truncate from revision {from_rev}"))
        })?;
        if from >= self.index.len() {
            return Err(RevlogError::InvalidArgument(format!(
                "cannot truncate from revision {from_rev}: only {} revisions",
                self.index.len()
            )));
        }
        let entry_size = self.index.version().entry_size() as u64;
        let data_end = self.index.start(from_rev);
        let index_end = if self.inline {
            from as u64 * entry_size + data_end
        } else {
            from as u64 * entry_size
        };

        let index_file = OpenOptions::new().write(true).open(&self.index_path)?;
        index_file.set_len(index_end)?;
        if !self.inline && self.data_path.exists() {
            let data_file = OpenOptions::new().write(true).open(&self.data_path)?;
            data_file.set_len(data_end)?;
        }

        self.index.truncate(from_rev)?;
        if let Some((cached_rev, _)) = &self.text_cache {
            if *cached_rev >= from_rev {
                self.text_cache = None;
            }
        }
        debug!(from_rev, "truncated revlog");
        Ok(())
    }

    /// Rewrites the sidedata slots (and flags) of a not-yet-durable V2
    /// revision, in memory and on disk.
    pub fn replace_sidedata(
        &mut self,
        rev: i32,
        sidedata_offset: u64,
        sidedata_len: i32,
        flags: u16,
        comp_mode: CompressionMode,
    ) -> Result<()> {
        self.index
            .replace_sidedata(rev, sidedata_offset, sidedata_len, flags, comp_mode)?;
        // V2 is never inline, so records sit at fixed positions.
        let pos = rev as u64 * self.index.version().entry_size() as u64;
        let binary = self.index.entry_binary(rev)?;
        let mut file = OpenOptions::new().write(true).open(&self.index_path)?;
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(&binary)?;
        Ok(())
    }

    /// Seals the sidedata rewrite window for every current revision.
    pub fn mark_durable(&mut self) {
        self.index.mark_durable();
    }

    /// Flushes file contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        for path in [&self.index_path, &self.data_path] {
            match File::open(path) {
                Ok(file) => file.sync_all()?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Drops derived caches; everything rebuilds on next use.
    pub fn clear_caches(&mut self) {
        self.text_cache = None;
        self.index.clear_caches();
    }
}

fn header_word_of(image: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = image
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| RevlogError::CorruptFormat("index too short for a header".into()))?;
    Ok(u32::from_be_bytes(bytes))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}
