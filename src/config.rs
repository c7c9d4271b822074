//! Revlog configuration options.
//!
//! [`RevlogConfig`] controls the on-disk format version, the physical
//! layout, and the delta-policy knobs. The defaults match the behavior the
//! engine is tuned for: general-delta chains with sparse reads enabled.

use crate::index::IndexVersion;

/// Configuration for one revlog instance.
///
/// # Example
///
/// ```ignore
/// let mut config = RevlogConfig::default();
/// config.max_chain_len = Some(1000);
/// ```
#[derive(Debug, Clone)]
pub struct RevlogConfig {
    /// On-disk index record format.
    pub version: IndexVersion,

    /// Interleave records and payload in a single file instead of keeping
    /// a separate data file. A per-log choice, not a per-entry one.
    pub inline: bool,

    /// Allow a delta base other than the immediately preceding revision.
    pub general_delta: bool,

    /// Account for sparse reads (chunked, gap-skipping) when scoring delta
    /// candidates, and permit intermediate snapshots.
    pub sparse_revlog: bool,

    /// Store deltas at all; when false every revision is a full snapshot.
    pub store_delta_chains: bool,

    /// Try a delta against both parents and keep the best, instead of
    /// trying the closer parent first and stopping on success.
    pub delta_both_parents: bool,

    /// Trust a caller-supplied delta base hint before searching.
    pub lazy_delta_base: bool,

    /// Hard cap on delta chain length; `None` means unbounded.
    pub max_chain_len: Option<u32>,

    /// Cap on the byte span a chain may cover on disk; 0 means unbounded.
    pub max_deltachain_span: u64,

    /// Target payload/span density under which sparse reads split a chunk.
    pub sr_density_threshold: f64,

    /// Gaps smaller than this are read through rather than skipped.
    pub sr_min_gap_size: u64,
}

impl Default for RevlogConfig {
    fn default() -> Self {
        Self {
            version: IndexVersion::V1,
            inline: false,
            general_delta: true,
            sparse_revlog: true,
            store_delta_chains: true,
            delta_both_parents: false,
            lazy_delta_base: true,
            max_chain_len: None,
            max_deltachain_span: 0,
            sr_density_threshold: 0.50,
            sr_min_gap_size: 64 * 1024,
        }
    }
}

impl RevlogConfig {
    /// Compact inline layout for small logs: records and payload in one
    /// file, no separate data file until the log outgrows it.
    pub fn inline() -> Self {
        Self {
            inline: true,
            ..Self::default()
        }
    }

    /// The headerless, flagless legacy format.
    pub fn legacy_v0() -> Self {
        Self {
            version: IndexVersion::V0,
            general_delta: false,
            sparse_revlog: false,
            ..Self::default()
        }
    }

    /// Newest format: sidedata slots and per-payload compression modes.
    pub fn v2() -> Self {
        Self {
            version: IndexVersion::V2,
            ..Self::default()
        }
    }
}
