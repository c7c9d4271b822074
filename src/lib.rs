//! An embeddable, versioned delta-storage engine.
//!
//! A [`Revlog`] keeps an append-only history of byte texts. Each revision
//! is stored as either a full snapshot or a delta against an earlier
//! revision, addressed by revision number or by a 20-byte node hash the
//! embedder computes through [`NodeHasher`]. On top of the storage core
//! sit content-transform flag processors ([`flags`]), a delta-base
//! selection policy ([`delta`]) and sparse-read chunk planning
//! ([`slice`]).
//!
//! ```ignore
//! let mut log = Revlog::open("mylog", RevlogConfig::default(), Box::new(Xxh64Hasher))?;
//! let (rev, node) = log.add_revision(b"hello\n", 0, &NULL_NODE, &NULL_NODE, 0, None, None)?;
//! assert_eq!(log.revision(rev)?, b"hello\n");
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod delta;
pub mod diff;
pub mod error;
pub mod flags;
pub mod index;
pub mod logging;
pub mod node;
pub mod revlog;
pub mod slice;

pub use config::RevlogConfig;
pub use error::{Result, RevlogError};
pub use flags::{
    FlagProcessor, FlagRegistry, REVISION_FLAG_CENSORED, REVISION_FLAG_ELLIPSIS,
    REVISION_FLAG_EXTSTORED,
};
pub use index::{Index, IndexEntry, IndexVersion};
pub use node::{NodeHasher, NodeId, Xxh64Hasher, NODE_SIZE, NULL_NODE, NULL_REV};
pub use revlog::Revlog;
