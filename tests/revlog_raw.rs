//! End-to-end exercise of the raw/logical text split.
//!
//! Revisions are appended in every adjacent combination of plain,
//! delta-hinted, flag-transformed and empty content, then read back in
//! several access orders, cache-cold after a reopen, and through the
//! stored-delta path.

use revlog::flags::AuxData;
use revlog::{
    FlagProcessor, Result, Revlog, RevlogConfig, RevlogError, Xxh64Hasher, NodeId, NULL_NODE,
    REVISION_FLAG_EXTSTORED,
};
use tempfile::tempdir;

const EXT_HEADER: &[u8] = b"E\n";

/// Stand-in for an external-storage transform: prefixes a header line and
/// swaps `1` for `i`, so raw bytes and logical text visibly differ.
struct ExtStored;

impl FlagProcessor for ExtStored {
    fn read(&self, raw: &[u8]) -> Result<(Vec<u8>, bool, AuxData)> {
        let body = raw.strip_prefix(EXT_HEADER).ok_or_else(|| {
            RevlogError::CorruptFormat("missing external-storage header".into())
        })?;
        let text = body
            .iter()
            .map(|&b| if b == b'i' { b'1' } else { b })
            .collect();
        Ok((text, true, AuxData::default()))
    }

    fn write(&self, text: &[u8]) -> Result<(Vec<u8>, bool)> {
        let mut raw = EXT_HEADER.to_vec();
        raw.extend(text.iter().map(|&b| if b == b'1' { b'i' } else { b }));
        Ok((raw, false))
    }

    fn raw(&self, _raw: &[u8]) -> Result<bool> {
        Ok(false)
    }
}

/// Revision kinds, combined pairwise so every adjacency occurs.
#[derive(Clone, Copy)]
struct Kind {
    ext: bool,
    hinted: bool,
    empty: bool,
}

fn kinds() -> Vec<Kind> {
    let base = [
        Kind { ext: false, hinted: false, empty: false },
        Kind { ext: true, hinted: false, empty: false },
        Kind { ext: false, hinted: true, empty: false },
        Kind { ext: false, hinted: false, empty: true },
        Kind { ext: true, hinted: true, empty: false },
        Kind { ext: true, hinted: false, empty: true },
        Kind { ext: false, hinted: true, empty: true },
        Kind { ext: true, hinted: true, empty: true },
    ];
    let mut sequence = Vec::new();
    for &a in &base {
        for &b in &base {
            sequence.push(a);
            sequence.push(b);
        }
    }
    sequence
}

fn text_for(i: usize, kind: Kind) -> Vec<u8> {
    if kind.empty {
        return Vec::new();
    }
    // No letter `i` outside the transform's own swap target.
    let mut text = b"shared 111 preamble\n".repeat(3);
    for row in 0..(i % 4 + 1) {
        text.extend_from_slice(format!("rev {i} row {row} v 1\n").as_bytes());
    }
    text
}

fn open_log(path: &std::path::Path, config: RevlogConfig) -> Result<Revlog> {
    let mut log = Revlog::open(path, config, Box::new(Xxh64Hasher))?;
    log.flag_registry_mut()
        .register(REVISION_FLAG_EXTSTORED, Box::new(ExtStored))?;
    Ok(log)
}

fn build(log: &mut Revlog) -> Result<(Vec<Vec<u8>>, Vec<NodeId>)> {
    let mut expected = Vec::new();
    let mut nodes = Vec::new();
    let mut parent = NULL_NODE;
    for (i, kind) in kinds().into_iter().enumerate() {
        let text = text_for(i, kind);
        let flags = if kind.ext { REVISION_FLAG_EXTSTORED } else { 0 };
        let hint = if kind.hinted && i > 0 {
            let base = i as i32 - 1;
            let old = log.rawdata(base)?;
            Some((base, revlog::diff::text_diff(&old, &text)?))
        } else {
            None
        };
        let (rev, node) = log.add_revision(&text, i as i32, &parent, &NULL_NODE, flags, None, hint)?;
        assert_eq!(rev, i as i32);
        expected.push(text);
        nodes.push(node);
        parent = node;
    }
    Ok((expected, nodes))
}

fn check_order(log: &mut Revlog, expected: &[Vec<u8>], order: &[usize]) -> Result<()> {
    for &i in order {
        assert_eq!(
            log.revision(i as i32)?,
            expected[i],
            "revision {i} mismatch"
        );
    }
    Ok(())
}

fn exercise(config: RevlogConfig) -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("raw");

    let (expected, nodes) = {
        let mut log = open_log(&path, config.clone())?;
        let built = build(&mut log)?;
        log.sync()?;
        built
    };
    let count = expected.len();

    let mut log = open_log(&path, config)?;
    assert_eq!(log.len(), count);

    // Forward, backward, and a stride that forces cache misses.
    let forward: Vec<usize> = (0..count).collect();
    let backward: Vec<usize> = (0..count).rev().collect();
    let strided: Vec<usize> = (0..count)
        .map(|i| (i * 7 + 3) % count)
        .collect();
    check_order(&mut log, &expected, &forward)?;
    check_order(&mut log, &expected, &backward)?;
    log.clear_caches();
    check_order(&mut log, &expected, &strided)?;

    // Raw-then-logical and logical-then-raw per revision.
    for i in 0..count as i32 {
        let raw = log.rawdata(i)?;
        assert_eq!(log.revision(i)?, expected[i as usize]);
        assert_eq!(log.rawdata(i)?, raw);
    }

    // Raw bytes of transformed revisions carry the header and the swap.
    for (i, kind) in kinds().into_iter().enumerate() {
        let raw = log.rawdata(i as i32)?;
        if kind.ext {
            assert!(raw.starts_with(EXT_HEADER));
            assert!(!raw.contains(&b'1'));
        } else {
            assert_eq!(raw, expected[i]);
        }
    }

    // Node lookups are stable across the reopen.
    for (i, node) in nodes.iter().enumerate() {
        assert_eq!(log.rev(node)?, i as i32);
    }

    // Stored deltas patch cleanly between neighbors.
    for i in 1..count as i32 {
        let delta = log.rev_diff(i - 1, i)?;
        let old = log.rawdata(i - 1)?;
        assert_eq!(revlog::diff::patch(&old, &delta)?, log.rawdata(i)?);
    }
    Ok(())
}

#[test]
fn raw_and_logical_texts_separate_layout() -> Result<()> {
    exercise(RevlogConfig::default())
}

#[test]
fn raw_and_logical_texts_inline_layout() -> Result<()> {
    exercise(RevlogConfig::inline())
}

#[test]
fn raw_and_logical_texts_v2_layout() -> Result<()> {
    exercise(RevlogConfig::v2())
}

#[test]
fn raw_and_logical_texts_without_general_delta() -> Result<()> {
    let config = RevlogConfig {
        general_delta: false,
        sparse_revlog: false,
        ..RevlogConfig::default()
    };
    exercise(config)
}
