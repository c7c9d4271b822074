//! The revlog index: an append-only, ordered sequence of fixed-shape
//! revision records plus a lazily-built node-to-revision map.
//!
//! Two physical layouts exist. "Separate" keeps fixed-size records in the
//! index file with payload elsewhere; record `i` lives at `i * entry_size`.
//! "Inline" interleaves each record with its payload in one file, so
//! locating record `i + 1` requires having parsed record `i`; a single
//! forward scan at load recovers random access.

mod codec;

pub use codec::{IndexVersion, FLAG_GENERAL_DELTA, FLAG_INLINE_DATA, INDEX_HEADER_SIZE};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{Result, RevlogError};
use crate::node::{NodeId, NULL_NODE, NULL_REV};
use crate::slice::SpanSource;

/// Per-payload compression tag carried by V2 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Payload stored verbatim, no compression envelope.
    Plain,
    /// Payload compressed with the log's default codec, no envelope.
    Default,
    /// Payload carries its own one-byte mode prefix.
    Inline,
}

impl CompressionMode {
    pub(crate) fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Default),
            2 => Ok(Self::Inline),
            other => Err(RevlogError::CorruptFormat(format!(
                "unknown compression mode {other}"
            ))),
        }
    }

    pub(crate) fn to_bits(self) -> u8 {
        match self {
            Self::Plain => 0,
            Self::Default => 1,
            Self::Inline => 2,
        }
    }
}

/// One revision record. Immutable once durable, except the sidedata slots
/// which may be rewritten while the revision's transaction is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Offset of the stored payload in the data stream.
    pub offset: u64,
    /// Content-transform flag bits.
    pub flags: u16,
    /// Stored (possibly compressed) payload length.
    pub compressed_len: i32,
    /// Logical raw payload length; `-1` means unknown (V0 legacy).
    pub uncompressed_len: i32,
    /// Delta base revision; equals the revision's own number for snapshots.
    pub base_rev: i32,
    /// External log entry this revision corresponds to.
    pub link_rev: i32,
    /// First logical parent (`-1` = none).
    pub p1_rev: i32,
    /// Second logical parent (`-1` = none).
    pub p2_rev: i32,
    /// Externally computed content hash.
    pub node: NodeId,
    /// Sidedata payload offset (V2).
    pub sidedata_offset: u64,
    /// Sidedata payload length (V2).
    pub sidedata_len: i32,
    /// Primary payload compression tag (V2).
    pub data_comp_mode: CompressionMode,
    /// Sidedata compression tag (V2).
    pub sidedata_comp_mode: CompressionMode,
}

impl IndexEntry {
    /// The constant entry returned for revision `-1`.
    pub const fn null() -> Self {
        Self {
            offset: 0,
            flags: 0,
            compressed_len: 0,
            uncompressed_len: 0,
            base_rev: NULL_REV,
            link_rev: NULL_REV,
            p1_rev: NULL_REV,
            p2_rev: NULL_REV,
            node: NULL_NODE,
            sidedata_offset: 0,
            sidedata_len: 0,
            data_comp_mode: CompressionMode::Inline,
            sidedata_comp_mode: CompressionMode::Inline,
        }
    }
}

const NULL_ENTRY: IndexEntry = IndexEntry::null();

/// The in-memory index over all revision records.
pub struct Index {
    version: IndexVersion,
    entries: Vec<IndexEntry>,
    nodemap: Option<FxHashMap<NodeId, i32>>,
    /// Entries below this count predate the open write session and may not
    /// be rewritten.
    durable_len: usize,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("version", &self.version)
            .field("len", &self.entries.len())
            .field("durable_len", &self.durable_len)
            .finish()
    }
}

impl Index {
    /// Creates an empty index.
    pub fn new(version: IndexVersion) -> Self {
        Self {
            version,
            entries: Vec::new(),
            nodemap: None,
            durable_len: 0,
        }
    }

    /// Parses an index file image.
    ///
    /// For the separate layout `data` must be an exact multiple of the
    /// record size. For the inline layout each record embeds the length of
    /// its trailing payload; the scan must land exactly on the end of the
    /// buffer. All parsed entries are considered durable.
    pub fn parse(version: IndexVersion, inline: bool, data: &[u8]) -> Result<Self> {
        let entry_size = version.entry_size();
        let mut entries = Vec::new();

        if inline {
            let mut off = 0;
            while off + entry_size <= data.len() {
                let mut entry = codec::unpack_entry(version, &data[off..off + entry_size])?;
                if entries.is_empty() {
                    entry = strip_header_overlay(version, entry);
                }
                let payload = usize::try_from(entry.compressed_len).map_err(|_| {
                    RevlogError::CorruptFormat("negative payload length in inline record".into())
                })?;
                off += entry_size + payload;
                entries.push(entry);
            }
            if off != data.len() {
                return Err(RevlogError::CorruptFormat(
                    "inline scan landed on an inconsistent record boundary".into(),
                ));
            }
        } else {
            if data.len() % entry_size != 0 {
                return Err(RevlogError::CorruptFormat(format!(
                    "index size {} is not a multiple of the {}-byte record",
                    data.len(),
                    entry_size
                )));
            }
            for (i, record) in data.chunks_exact(entry_size).enumerate() {
                let mut entry = codec::unpack_entry(version, record)?;
                if i == 0 {
                    entry = strip_header_overlay(version, entry);
                }
                entries.push(entry);
            }
        }

        trace!(count = entries.len(), ?version, inline, "parsed index");
        let durable_len = entries.len();
        Ok(Self {
            version,
            entries,
            nodemap: None,
            durable_len,
        })
    }

    /// On-disk format version of this index.
    pub fn version(&self) -> IndexVersion {
        self.version
    }

    /// Number of revisions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the log holds no revision.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Random access to one record. Revision `-1` yields the null entry.
    pub fn get(&self, rev: i32) -> Result<&IndexEntry> {
        if rev == NULL_REV {
            return Ok(&NULL_ENTRY);
        }
        usize::try_from(rev)
            .ok()
            .and_then(|i| self.entries.get(i))
            .ok_or_else(|| RevlogError::InvalidArgument(format!("revision {rev} out of range")))
    }

    /// Appends one record. Amortized O(1); keeps the nodemap current when
    /// it has been materialized.
    pub fn append(&mut self, entry: IndexEntry) {
        if let Some(map) = self.nodemap.as_mut() {
            map.insert(entry.node, self.entries.len() as i32);
        }
        self.entries.push(entry);
    }

    /// Drops every record at or after `from_rev`. Only a contiguous tail
    /// can be removed; nodemap entries for the dropped tail are purged.
    pub fn truncate(&mut self, from_rev: i32) -> Result<()> {
        let from = usize::try_from(from_rev).map_err(|_| {
            RevlogError::InvalidArgument(format!("cannot truncate from revision {from_rev}"))
        })?;
        if from > self.entries.len() {
            return Err(RevlogError::InvalidArgument(format!(
                "cannot truncate from revision {from_rev}: only {} revisions",
                self.entries.len()
            )));
        }
        if let Some(map) = self.nodemap.as_mut() {
            for entry in &self.entries[from..] {
                map.remove(&entry.node);
            }
        }
        self.entries.truncate(from);
        self.durable_len = self.durable_len.min(from);
        Ok(())
    }

    /// Revision for `node`; fails with [`RevlogError::UnknownNode`] when
    /// the hash is absent.
    pub fn rev(&mut self, node: &NodeId) -> Result<i32> {
        self.get_rev(node).ok_or(RevlogError::UnknownNode)
    }

    /// Revision for `node`, or `None`. The null node maps to revision `-1`.
    pub fn get_rev(&mut self, node: &NodeId) -> Option<i32> {
        if *node == NULL_NODE {
            return Some(NULL_REV);
        }
        self.materialized_nodemap().get(node).copied()
    }

    /// True when `node` exists in the index.
    pub fn has_node(&mut self, node: &NodeId) -> bool {
        self.get_rev(node).is_some()
    }

    fn materialized_nodemap(&mut self) -> &FxHashMap<NodeId, i32> {
        if self.nodemap.is_none() {
            let mut map = FxHashMap::default();
            for (i, entry) in self.entries.iter().enumerate() {
                map.insert(entry.node, i as i32);
            }
            self.nodemap = Some(map);
        }
        self.nodemap.as_ref().expect("nodemap just built")
    }

    /// Serializes one record to its exact on-disk bytes.
    ///
    /// Under V1 the file header overlays the first entry's leading word, so
    /// `entry_binary(0)` omits those header bytes.
    pub fn entry_binary(&self, rev: i32) -> Result<Vec<u8>> {
        let entry = self.get(rev)?;
        let packed = codec::pack_entry(self.version, entry)?;
        if rev == 0 && self.version == IndexVersion::V1 {
            return Ok(packed[INDEX_HEADER_SIZE..].to_vec());
        }
        Ok(packed)
    }

    /// Serializes the leading format header for this version.
    ///
    /// V0 has no header; V2 keeps its format information in an external
    /// docket, so asking for a header is an error.
    pub fn pack_header(&self, header: u32) -> Result<Vec<u8>> {
        match self.version {
            IndexVersion::V0 => Ok(Vec::new()),
            IndexVersion::V1 => Ok(header.to_be_bytes().to_vec()),
            IndexVersion::V2 => Err(RevlogError::InvalidArgument(
                "version header belongs in the docket, not the v2 index".into(),
            )),
        }
    }

    /// Rewrites the sidedata slots (and flags) of a not-yet-durable entry.
    ///
    /// Fails with [`RevlogError::OutOfTransactionRewrite`] for revisions
    /// created before the still-open write session.
    pub fn replace_sidedata(
        &mut self,
        rev: i32,
        sidedata_offset: u64,
        sidedata_len: i32,
        flags: u16,
        comp_mode: CompressionMode,
    ) -> Result<()> {
        if !self.version.supports_sidedata() {
            return Err(RevlogError::InvalidArgument(
                "sidedata requires index format v2".into(),
            ));
        }
        let i = usize::try_from(rev)
            .ok()
            .filter(|&i| i < self.entries.len())
            .ok_or_else(|| RevlogError::InvalidArgument(format!("revision {rev} out of range")))?;
        if i < self.durable_len {
            return Err(RevlogError::OutOfTransactionRewrite);
        }
        let entry = &mut self.entries[i];
        entry.sidedata_offset = sidedata_offset;
        entry.sidedata_len = sidedata_len;
        entry.flags = flags;
        entry.sidedata_comp_mode = comp_mode;
        Ok(())
    }

    /// Seals the rewrite window: every current entry becomes durable.
    /// Called by the surrounding transaction layer when it closes.
    pub fn mark_durable(&mut self) {
        self.durable_len = self.entries.len();
    }

    /// Count of entries that predate the open write session.
    pub fn durable_len(&self) -> usize {
        self.durable_len
    }

    /// Drops derived caches (the nodemap); they rebuild on next use.
    pub fn clear_caches(&mut self) {
        self.nodemap = None;
    }
}

/// Entry 0's leading word is overlaid by the file header on disk (V1), so
/// its parsed offset is garbage; the first payload always starts at 0.
fn strip_header_overlay(version: IndexVersion, mut entry: IndexEntry) -> IndexEntry {
    if version == IndexVersion::V1 {
        entry.offset = 0;
    }
    entry
}

impl SpanSource for Index {
    fn start(&self, rev: i32) -> u64 {
        self.get(rev).map_or(0, |e| e.offset)
    }

    fn length(&self, rev: i32) -> u64 {
        self.get(rev).map_or(0, |e| e.compressed_len.max(0) as u64)
    }

    fn count(&self) -> i32 {
        self.entries.len() as i32
    }
}
