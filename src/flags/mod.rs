//! Revision flags and their content-transform processors.
//!
//! Each flag bit may carry a processor: a (read, write, raw) triple that
//! maps between the logical text callers see and the raw bytes the revlog
//! stores. The bits form a fixed, closed set with one canonical total
//! order; read transforms run in ascending canonical order and write
//! transforms in exact reverse, so non-commutative transforms compose
//! consistently.
//!
//! The registry is an explicit per-engine value rather than process-global
//! state, so two revlog instances in one process never share mutable
//! registration state.

use rustc_hash::FxHashMap;

use crate::error::{Result, RevlogError};

/// The revision's stored content has been censored; the payload is a
/// tombstone, not the real text.
pub const REVISION_FLAG_CENSORED: u16 = 1 << 15;
/// The revision is an ellipsis placeholder in a shallow log.
pub const REVISION_FLAG_ELLIPSIS: u16 = 1 << 14;
/// The revision's real content lives in external storage.
pub const REVISION_FLAG_EXTSTORED: u16 = 1 << 13;

/// Canonical processing order of the flag bits. Read transforms apply in
/// this order, write transforms in reverse. Must stay stable: the order is
/// part of the stored-byte contract.
pub const FLAG_PROCESSING_ORDER: [u16; 3] = [
    REVISION_FLAG_CENSORED,
    REVISION_FLAG_ELLIPSIS,
    REVISION_FLAG_EXTSTORED,
];

/// Union of all defined flag bits. Set bits outside this mask in stored
/// data are a hard format error.
pub const KNOWN_FLAGS: u16 =
    REVISION_FLAG_CENSORED | REVISION_FLAG_ELLIPSIS | REVISION_FLAG_EXTSTORED;

/// Flags whose write transform changes the raw byte layout unpredictably.
/// Revisions carrying one of these are never used as delta bases and never
/// stored as deltas themselves.
pub const RAWTEXT_CHANGING_FLAGS: u16 = REVISION_FLAG_CENSORED | REVISION_FLAG_EXTSTORED;

/// Flag set of an ordinary revision.
pub const DEFAULT_FLAGS: u16 = 0;

/// Auxiliary data a read transform may surface alongside the text.
pub type AuxData = FxHashMap<String, Vec<u8>>;

/// A content transform registered against exactly one flag bit.
///
/// The boolean returned by each method reports whether the bytes it
/// produced (or inspected, for [`raw`](FlagProcessor::raw)) can be used
/// for hash integrity checking. `write` and `read` usually return
/// opposite values; `raw` matches `write`.
pub trait FlagProcessor {
    /// Transform stored raw bytes into logical text.
    fn read(&self, raw: &[u8]) -> Result<(Vec<u8>, bool, AuxData)>;
    /// Transform logical text into the raw bytes destined for storage.
    fn write(&self, text: &[u8]) -> Result<(Vec<u8>, bool)>;
    /// Report hash trust for raw bytes without materializing the text.
    fn raw(&self, raw: &[u8]) -> Result<bool>;
}

/// Per-engine registry mapping flag bits to their processors.
///
/// At most one processor per bit. The censored bit is pre-registered with
/// no transform: the bit is legal in stored data, but reading censored
/// content is handled by the censorship path, not a byte transform.
pub struct FlagRegistry {
    processors: FxHashMap<u16, Option<Box<dyn FlagProcessor>>>,
}

impl Default for FlagRegistry {
    fn default() -> Self {
        let mut processors: FxHashMap<u16, Option<Box<dyn FlagProcessor>>> =
            FxHashMap::default();
        processors.insert(REVISION_FLAG_CENSORED, None);
        Self { processors }
    }
}

impl std::fmt::Debug for FlagRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bits: Vec<u16> = self.processors.keys().copied().collect();
        bits.sort_unstable();
        f.debug_struct("FlagRegistry").field("bits", &bits).finish()
    }
}

impl FlagRegistry {
    /// Creates a registry with only the built-in censored slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `processor` on `flag`.
    ///
    /// Fails with [`RevlogError::UnknownFlagBit`] when `flag` is not a
    /// single defined bit, and [`RevlogError::DuplicateProcessor`] when the
    /// bit already has a registration.
    pub fn register(&mut self, flag: u16, processor: Box<dyn FlagProcessor>) -> Result<()> {
        if flag & KNOWN_FLAGS == 0 || !FLAG_PROCESSING_ORDER.contains(&flag) {
            return Err(RevlogError::UnknownFlagBit(flag));
        }
        if self.processors.contains_key(&flag) {
            return Err(RevlogError::DuplicateProcessor(flag));
        }
        self.processors.insert(flag, Some(processor));
        Ok(())
    }

    /// Applies read transforms in ascending canonical order.
    ///
    /// Returns the logical text, whether it may be used for hash
    /// verification, and any auxiliary data surfaced by the transforms.
    pub fn apply_read(&self, raw: &[u8], flags: u16) -> Result<(Vec<u8>, bool, AuxData)> {
        if flags == 0 {
            return Ok((raw.to_vec(), true, AuxData::default()));
        }
        self.check_known(flags)?;

        let mut text = raw.to_vec();
        let mut trusted = true;
        let mut aux = AuxData::default();
        for &flag in FLAG_PROCESSING_ORDER.iter() {
            if flag & flags == 0 {
                continue;
            }
            if let Some(processor) = self.lookup(flag)? {
                let (next, vhash, extra) = processor.read(&text)?;
                text = next;
                trusted = trusted && vhash;
                aux.extend(extra);
            }
        }
        Ok((text, trusted, aux))
    }

    /// Applies write transforms in descending canonical order: the exact
    /// inverse of [`apply_read`](Self::apply_read).
    pub fn apply_write(&self, text: &[u8], flags: u16) -> Result<(Vec<u8>, bool)> {
        if flags == 0 {
            return Ok((text.to_vec(), true));
        }
        self.check_known(flags)?;

        let mut raw = text.to_vec();
        let mut trusted = true;
        for &flag in FLAG_PROCESSING_ORDER.iter().rev() {
            if flag & flags == 0 {
                continue;
            }
            if let Some(processor) = self.lookup(flag)? {
                let (next, vhash) = processor.write(&raw)?;
                raw = next;
                trusted = trusted && vhash;
            }
        }
        Ok((raw, trusted))
    }

    /// Runs only the cheap raw-trust predicates, in descending canonical
    /// order, without materializing transformed text.
    pub fn apply_raw(&self, raw: &[u8], flags: u16) -> Result<bool> {
        if flags == 0 {
            return Ok(true);
        }
        self.check_known(flags)?;

        let mut trusted = true;
        for &flag in FLAG_PROCESSING_ORDER.iter().rev() {
            if flag & flags == 0 {
                continue;
            }
            if let Some(processor) = self.lookup(flag)? {
                trusted = trusted && processor.raw(raw)?;
            }
        }
        Ok(trusted)
    }

    fn check_known(&self, flags: u16) -> Result<()> {
        if flags & !KNOWN_FLAGS != 0 {
            return Err(RevlogError::CorruptFormat(format!(
                "incompatible revision flag 0x{:04x}",
                flags & !KNOWN_FLAGS
            )));
        }
        Ok(())
    }

    fn lookup(&self, flag: u16) -> Result<&Option<Box<dyn FlagProcessor>>> {
        self.processors
            .get(&flag)
            .ok_or(RevlogError::MissingProcessor(flag))
    }
}
