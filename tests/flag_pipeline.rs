//! Flag-processor composition and censorship behavior through a real log.

use revlog::flags::AuxData;
use revlog::{
    FlagProcessor, Result, Revlog, RevlogConfig, RevlogError, Xxh64Hasher, NodeHasher, NULL_NODE,
    REVISION_FLAG_CENSORED, REVISION_FLAG_ELLIPSIS, REVISION_FLAG_EXTSTORED,
};
use tempfile::tempdir;

/// Wraps the payload in a named envelope so transform order is visible in
/// the stored bytes.
struct Envelope(&'static [u8]);

impl FlagProcessor for Envelope {
    fn read(&self, raw: &[u8]) -> Result<(Vec<u8>, bool, AuxData)> {
        let body = raw
            .strip_prefix(self.0)
            .ok_or_else(|| RevlogError::CorruptFormat("missing envelope".into()))?;
        Ok((body.to_vec(), true, AuxData::default()))
    }

    fn write(&self, text: &[u8]) -> Result<(Vec<u8>, bool)> {
        let mut raw = self.0.to_vec();
        raw.extend_from_slice(text);
        Ok((raw, false))
    }

    fn raw(&self, _raw: &[u8]) -> Result<bool> {
        Ok(false)
    }
}

fn open_log(dir: &std::path::Path) -> Result<Revlog> {
    Revlog::open(dir.join("log"), RevlogConfig::default(), Box::new(Xxh64Hasher))
}

#[test]
fn combined_flags_nest_in_canonical_order() -> Result<()> {
    let dir = tempdir()?;
    let mut log = open_log(dir.path())?;
    log.flag_registry_mut()
        .register(REVISION_FLAG_ELLIPSIS, Box::new(Envelope(b"EL|")))?;
    log.flag_registry_mut()
        .register(REVISION_FLAG_EXTSTORED, Box::new(Envelope(b"XS|")))?;

    let flags = REVISION_FLAG_ELLIPSIS | REVISION_FLAG_EXTSTORED;
    let (rev, _) = log.add_revision(b"payload\n", 0, &NULL_NODE, &NULL_NODE, flags, None, None)?;

    // Write descends the canonical order, so the ellipsis envelope ends up
    // outermost and the forward read order strips it first.
    assert_eq!(log.rawdata(rev)?, b"EL|XS|payload\n");
    assert_eq!(log.revision(rev)?, b"payload\n");
    Ok(())
}

#[test]
fn set_flag_without_processor_fails_on_write() -> Result<()> {
    let dir = tempdir()?;
    let mut log = open_log(dir.path())?;
    let err = log
        .add_revision(b"x\n", 0, &NULL_NODE, &NULL_NODE, REVISION_FLAG_ELLIPSIS, None, None)
        .unwrap_err();
    assert!(matches!(err, RevlogError::MissingProcessor(_)));
    assert!(log.is_empty());
    Ok(())
}

#[test]
fn registry_is_per_engine() -> Result<()> {
    let dir = tempdir()?;
    let mut a = Revlog::open(dir.path().join("a"), RevlogConfig::default(), Box::new(Xxh64Hasher))?;
    let b = Revlog::open(dir.path().join("b"), RevlogConfig::default(), Box::new(Xxh64Hasher))?;
    a.flag_registry_mut()
        .register(REVISION_FLAG_EXTSTORED, Box::new(Envelope(b"XS|")))?;
    // The second engine never saw that registration.
    let err = b
        .flag_registry()
        .apply_read(b"XS|x", REVISION_FLAG_EXTSTORED)
        .unwrap_err();
    assert!(matches!(err, RevlogError::MissingProcessor(_)));
    Ok(())
}

#[test]
fn censored_revision_reads_as_censored() -> Result<()> {
    let dir = tempdir()?;
    let mut log = open_log(dir.path())?;
    let (_, n0) = log.add_revision(b"base\n", 0, &NULL_NODE, &NULL_NODE, 0, None, None)?;

    // The tombstone replaces real content whose node the caller supplies.
    let real_node = Xxh64Hasher.node_id(b"top secret\n", &n0, &NULL_NODE);
    let tombstone = b"censored: removed by request\n";
    let (r1, _) = log.add_revision(
        tombstone,
        1,
        &n0,
        &NULL_NODE,
        REVISION_FLAG_CENSORED,
        Some(real_node),
        None,
    )?;

    assert!(log.is_censored(r1)?);
    assert_eq!(log.rawdata(r1)?, tombstone);
    assert!(matches!(
        log.revision(r1).unwrap_err(),
        RevlogError::CensoredContent(_)
    ));

    // History continues past the censored revision.
    let (r2, _) = log.add_revision(b"clean\n", 2, &real_node, &NULL_NODE, 0, None, None)?;
    assert_eq!(log.revision(r2)?, b"clean\n");
    assert_eq!(log.parent_revs(r2)?, (r1, -1));
    Ok(())
}

#[test]
fn delta_onto_censored_base_replaces_everything() -> Result<()> {
    let dir = tempdir()?;
    let mut log = open_log(dir.path())?;
    let (_, n0) = log.add_revision(b"base\n", 0, &NULL_NODE, &NULL_NODE, 0, None, None)?;
    let real_node = Xxh64Hasher.node_id(b"gone\n", &n0, &NULL_NODE);
    let tombstone = b"censored: gone\n";
    let (r1, censored_node) = log.add_revision(
        tombstone,
        1,
        &n0,
        &NULL_NODE,
        REVISION_FLAG_CENSORED,
        Some(real_node),
        None,
    )?;
    assert_eq!(censored_node, real_node);

    // Ingest the child as a delta replacing the tombstone wholesale, the
    // only delta shape allowed on a censored base.
    let child_text = b"after the fact\n".to_vec();
    let mut delta = Vec::new();
    delta.extend_from_slice(&0i32.to_be_bytes());
    delta.extend_from_slice(&(tombstone.len() as i32).to_be_bytes());
    delta.extend_from_slice(&(child_text.len() as i32).to_be_bytes());
    delta.extend_from_slice(&child_text);

    let child_node = Xxh64Hasher.node_id(&child_text, &real_node, &NULL_NODE);
    let r2 = log.add_delta(child_node, 2, &real_node, &NULL_NODE, 0, r1, delta)?;
    assert_eq!(log.revision(r2)?, child_text);
    Ok(())
}
