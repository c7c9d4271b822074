//! Node identifiers and the external hashing seam.
//!
//! A revlog stores and indexes 20-byte content hashes ("nodes") but never
//! computes them on its own authority: the hash function is supplied by the
//! embedder so the engine stays agnostic of the surrounding identity scheme.
//! [`Xxh64Hasher`] is a ready-made implementation for embedders without an
//! established scheme (and for tests).

use xxhash_rust::xxh64::Xxh64;

/// Width of a node hash in bytes.
pub const NODE_SIZE: usize = 20;

/// A 20-byte content hash identifying one revision.
pub type NodeId = [u8; NODE_SIZE];

/// The null node: parent slot of a parentless revision.
pub const NULL_NODE: NodeId = [0u8; NODE_SIZE];

/// Revision number of the null revision.
pub const NULL_REV: i32 = -1;

/// Computes the node id of a revision from its logical text and parents.
///
/// Implementations must be deterministic and must fold both parent nodes
/// into the digest in a parent-order-insensitive way, so that the same
/// content with swapped parents yields the same node.
pub trait NodeHasher {
    /// Hash `text` together with its parent nodes.
    fn node_id(&self, text: &[u8], p1: &NodeId, p2: &NodeId) -> NodeId;
}

/// Default hasher deriving a 20-byte node from three seeded xxh64 lanes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh64Hasher;

impl NodeHasher for Xxh64Hasher {
    fn node_id(&self, text: &[u8], p1: &NodeId, p2: &NodeId) -> NodeId {
        // Sort parents so the digest is insensitive to parent order.
        let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
        let mut node = [0u8; NODE_SIZE];
        for (lane, chunk) in node.chunks_mut(8).enumerate() {
            let mut h = Xxh64::new(lane as u64);
            h.update(lo);
            h.update(hi);
            h.update(text);
            let digest = h.digest().to_be_bytes();
            chunk.copy_from_slice(&digest[..chunk.len()]);
        }
        node
    }
}
