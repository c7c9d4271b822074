//! Binary record codecs for the three index format versions.
//!
//! All integers are big-endian. The layouts share one [`IndexEntry`]
//! shape; each version packs a subset of its fields:
//!
//! - V0: 48-byte records, no file header, no flags, no sidedata.
//! - V1: 64-byte records behind a 4-byte file header; the header overlays
//!   the first entry's leading word, so entry 0's offset is implicitly 0.
//! - V2: 96-byte records adding sidedata location and per-payload
//!   compression modes; the version header lives in an external docket.

use crate::error::{Result, RevlogError};
use crate::node::{NodeId, NODE_SIZE};

use super::{CompressionMode, IndexEntry};

/// On-disk index format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVersion {
    /// Headerless legacy format: no flags, no sidedata.
    V0,
    /// Packed (offset, flags) word and a leading format header.
    V1,
    /// V1 plus sidedata slots and compression-mode bits.
    V2,
}

/// Size of the V1 leading format header.
pub const INDEX_HEADER_SIZE: usize = 4;

/// Header bit marking an inline (interleaved records and payload) file.
pub const FLAG_INLINE_DATA: u32 = 1 << 16;
/// Header bit marking a general-delta log.
pub const FLAG_GENERAL_DELTA: u32 = 1 << 17;

const V0_ENTRY_SIZE: usize = 48;
const V1_ENTRY_SIZE: usize = 64;
const V2_ENTRY_SIZE: usize = 96;

/// Offsets are stored in 48 bits in V1/V2 (the low 16 carry flags).
const MAX_OFFSET: u64 = (1 << 48) - 1;

impl IndexVersion {
    /// Fixed record size for this version.
    pub fn entry_size(self) -> usize {
        match self {
            IndexVersion::V0 => V0_ENTRY_SIZE,
            IndexVersion::V1 => V1_ENTRY_SIZE,
            IndexVersion::V2 => V2_ENTRY_SIZE,
        }
    }

    /// Version number carried in the format header word.
    pub fn header_version(self) -> u32 {
        match self {
            IndexVersion::V0 => 0,
            IndexVersion::V1 => 1,
            IndexVersion::V2 => 2,
        }
    }

    /// Whether records carry flag bits at all.
    pub fn supports_flags(self) -> bool {
        !matches!(self, IndexVersion::V0)
    }

    /// Whether records carry sidedata slots.
    pub fn supports_sidedata(self) -> bool {
        matches!(self, IndexVersion::V2)
    }
}

/// Serializes one record to its exact on-disk layout.
pub fn pack_entry(version: IndexVersion, entry: &IndexEntry) -> Result<Vec<u8>> {
    match version {
        IndexVersion::V0 => pack_v0(entry),
        IndexVersion::V1 => {
            if entry.sidedata_offset != 0 || entry.sidedata_len != 0 {
                return Err(RevlogError::InvalidArgument(
                    "sidedata requires index format v2".into(),
                ));
            }
            let mut buf = Vec::with_capacity(V1_ENTRY_SIZE);
            pack_common(&mut buf, entry)?;
            buf.resize(V1_ENTRY_SIZE, 0);
            Ok(buf)
        }
        IndexVersion::V2 => {
            let mut buf = Vec::with_capacity(V2_ENTRY_SIZE);
            pack_common(&mut buf, entry)?;
            buf.resize(V1_ENTRY_SIZE, 0);
            buf.extend_from_slice(&entry.sidedata_offset.to_be_bytes());
            buf.extend_from_slice(&entry.sidedata_len.to_be_bytes());
            let modes =
                entry.data_comp_mode.to_bits() | (entry.sidedata_comp_mode.to_bits() << 2);
            buf.push(modes);
            buf.resize(V2_ENTRY_SIZE, 0);
            Ok(buf)
        }
    }
}

/// Decodes one record from its exact on-disk layout.
pub fn unpack_entry(version: IndexVersion, data: &[u8]) -> Result<IndexEntry> {
    if data.len() != version.entry_size() {
        return Err(RevlogError::CorruptFormat(format!(
            "index record size mismatch: expected {}, got {}",
            version.entry_size(),
            data.len()
        )));
    }
    match version {
        IndexVersion::V0 => unpack_v0(data),
        IndexVersion::V1 => unpack_common(data),
        IndexVersion::V2 => {
            let mut entry = unpack_common(&data[..V1_ENTRY_SIZE])?;
            entry.sidedata_offset = read_u64(data, V1_ENTRY_SIZE)?;
            entry.sidedata_len = read_i32(data, V1_ENTRY_SIZE + 8)?;
            let modes = data[V1_ENTRY_SIZE + 12];
            entry.data_comp_mode = CompressionMode::from_bits(modes & 0b11)?;
            entry.sidedata_comp_mode = CompressionMode::from_bits((modes >> 2) & 0b11)?;
            Ok(entry)
        }
    }
}

fn pack_v0(entry: &IndexEntry) -> Result<Vec<u8>> {
    if entry.flags != 0 {
        return Err(RevlogError::InvalidArgument(
            "index entry flags need format v1 or later".into(),
        ));
    }
    let offset = u32::try_from(entry.offset)
        .map_err(|_| RevlogError::InvalidArgument("offset does not fit v0 record".into()))?;
    let mut buf = Vec::with_capacity(V0_ENTRY_SIZE);
    buf.extend_from_slice(&offset.to_be_bytes());
    buf.extend_from_slice(&entry.compressed_len.to_be_bytes());
    buf.extend_from_slice(&entry.uncompressed_len.to_be_bytes());
    buf.extend_from_slice(&entry.base_rev.to_be_bytes());
    buf.extend_from_slice(&entry.link_rev.to_be_bytes());
    buf.extend_from_slice(&entry.p1_rev.to_be_bytes());
    buf.extend_from_slice(&entry.p2_rev.to_be_bytes());
    buf.extend_from_slice(&entry.node);
    Ok(buf)
}

fn unpack_v0(data: &[u8]) -> Result<IndexEntry> {
    Ok(IndexEntry {
        offset: u64::from(read_u32(data, 0)?),
        flags: 0,
        compressed_len: read_i32(data, 4)?,
        uncompressed_len: read_i32(data, 8)?,
        base_rev: read_i32(data, 12)?,
        link_rev: read_i32(data, 16)?,
        p1_rev: read_i32(data, 20)?,
        p2_rev: read_i32(data, 24)?,
        node: read_node(data, 28)?,
        ..IndexEntry::null()
    })
}

fn pack_common(buf: &mut Vec<u8>, entry: &IndexEntry) -> Result<()> {
    if entry.offset > MAX_OFFSET {
        return Err(RevlogError::InvalidArgument(
            "offset exceeds the 48-bit record field".into(),
        ));
    }
    let offset_flags = (entry.offset << 16) | u64::from(entry.flags);
    buf.extend_from_slice(&offset_flags.to_be_bytes());
    buf.extend_from_slice(&entry.compressed_len.to_be_bytes());
    buf.extend_from_slice(&entry.uncompressed_len.to_be_bytes());
    buf.extend_from_slice(&entry.base_rev.to_be_bytes());
    buf.extend_from_slice(&entry.link_rev.to_be_bytes());
    buf.extend_from_slice(&entry.p1_rev.to_be_bytes());
    buf.extend_from_slice(&entry.p2_rev.to_be_bytes());
    buf.extend_from_slice(&entry.node);
    Ok(())
}

fn unpack_common(data: &[u8]) -> Result<IndexEntry> {
    let offset_flags = read_u64(data, 0)?;
    Ok(IndexEntry {
        offset: offset_flags >> 16,
        flags: (offset_flags & 0xFFFF) as u16,
        compressed_len: read_i32(data, 8)?,
        uncompressed_len: read_i32(data, 12)?,
        base_rev: read_i32(data, 16)?,
        link_rev: read_i32(data, 20)?,
        p1_rev: read_i32(data, 24)?,
        p2_rev: read_i32(data, 28)?,
        node: read_node(data, 32)?,
        ..IndexEntry::null()
    })
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes: [u8; 4] = slice_at(buf, offset, 4)?
        .try_into()
        .expect("slice length checked");
    Ok(u32::from_be_bytes(bytes))
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32> {
    let bytes: [u8; 4] = slice_at(buf, offset, 4)?
        .try_into()
        .expect("slice length checked");
    Ok(i32::from_be_bytes(bytes))
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
    let bytes: [u8; 8] = slice_at(buf, offset, 8)?
        .try_into()
        .expect("slice length checked");
    Ok(u64::from_be_bytes(bytes))
}

fn read_node(buf: &[u8], offset: usize) -> Result<NodeId> {
    let bytes: NodeId = slice_at(buf, offset, NODE_SIZE)?
        .try_into()
        .expect("slice length checked");
    Ok(bytes)
}

fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    buf.get(offset..offset + len).ok_or_else(|| {
        RevlogError::CorruptFormat(format!("index record read out of bounds at {offset}"))
    })
}
