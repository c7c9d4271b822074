//! Line-aligned binary delta codec.
//!
//! A delta is a concatenation of hunks. Each hunk is a 12-byte big-endian
//! header `(start, end, data_len)` followed by `data_len` replacement
//! bytes: the base's `[start, end)` range is replaced by the data. Hunks
//! are ordered and non-overlapping.
//!
//! A delta whose single hunk replaces the entire base (`start == 0`,
//! `end == base_len`) is a *replacement diff*. Deltas against censored
//! bases must take this form so reconstruction never needs the base's real
//! bytes; [`is_replacement_diff`] recognizes it without decoding anything.

use crate::error::{Result, RevlogError};

/// Size of one hunk header: three big-endian i32 words.
pub const HUNK_HEADER_SIZE: usize = 12;

/// Builds the header of a hunk replacing an entire `base_len`-byte base
/// with `data_len` new bytes.
pub fn replace_diff_header(base_len: usize, data_len: usize) -> Result<[u8; HUNK_HEADER_SIZE]> {
    let mut header = [0u8; HUNK_HEADER_SIZE];
    header[4..8].copy_from_slice(&to_i32(base_len, "base length")?.to_be_bytes());
    header[8..12].copy_from_slice(&to_i32(data_len, "replacement length")?.to_be_bytes());
    Ok(header)
}

/// Returns true when `delta` replaces the whole of a `base_len`-byte base.
pub fn is_replacement_diff(delta: &[u8], base_len: usize) -> bool {
    if delta.len() < HUNK_HEADER_SIZE {
        return false;
    }
    match replace_diff_header(base_len, delta.len() - HUNK_HEADER_SIZE) {
        Ok(header) => delta[..HUNK_HEADER_SIZE] == header,
        Err(_) => false,
    }
}

/// Builds a delta that transforms `old` into `new`.
///
/// The diff is a single hunk covering the lines that changed: the common
/// line-aligned prefix and suffix are kept, everything between is
/// replaced. An empty delta means the texts are identical.
pub fn text_diff(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    if old == new {
        return Ok(Vec::new());
    }

    let limit = old.len().min(new.len());
    let mut prefix = 0;
    while prefix < limit && old[prefix] == new[prefix] {
        prefix += 1;
    }
    // Back prefix up to a line boundary so hunks stay line-shaped.
    prefix = old[..prefix]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |p| p + 1);

    let mut suffix = 0;
    let max_suffix = limit - prefix;
    while suffix < max_suffix && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix] {
        suffix += 1;
    }
    // The suffix must begin right after a newline, or cover the whole of
    // `old` (offset 0 counts as a line start).
    while suffix > 0 && suffix < old.len() && old[old.len() - suffix - 1] != b'\n' {
        suffix -= 1;
    }

    let start = prefix;
    let end = old.len() - suffix;
    let data = &new[prefix..new.len() - suffix];

    let mut delta = Vec::with_capacity(HUNK_HEADER_SIZE + data.len());
    delta.extend_from_slice(&to_i32(start, "hunk start")?.to_be_bytes());
    delta.extend_from_slice(&to_i32(end, "hunk end")?.to_be_bytes());
    delta.extend_from_slice(&to_i32(data.len(), "hunk length")?.to_be_bytes());
    delta.extend_from_slice(data);
    Ok(delta)
}

/// Applies `delta` to `base`, producing the new text.
pub fn patch(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(base.len() + delta.len());
    let mut pos = 0usize;
    let mut off = 0usize;

    while off < delta.len() {
        if delta.len() - off < HUNK_HEADER_SIZE {
            return Err(RevlogError::CorruptFormat(
                "truncated delta hunk header".into(),
            ));
        }
        let start = read_i32(delta, off)?;
        let end = read_i32(delta, off + 4)?;
        let data_len = read_i32(delta, off + 8)?;
        off += HUNK_HEADER_SIZE;

        if start < 0 || end < start || data_len < 0 {
            return Err(RevlogError::CorruptFormat(
                "delta hunk header out of range".into(),
            ));
        }
        let (start, end, data_len) = (start as usize, end as usize, data_len as usize);
        if start < pos || end > base.len() {
            return Err(RevlogError::CorruptFormat(
                "delta hunk outside base bounds".into(),
            ));
        }
        if delta.len() - off < data_len {
            return Err(RevlogError::CorruptFormat(
                "truncated delta hunk payload".into(),
            ));
        }

        out.extend_from_slice(&base[pos..start]);
        out.extend_from_slice(&delta[off..off + data_len]);
        pos = end;
        off += data_len;
    }

    out.extend_from_slice(&base[pos..]);
    Ok(out)
}

/// Size of the text produced by applying `delta` to a `base_len`-byte
/// base, computed from hunk headers alone.
pub fn patched_size(base_len: usize, delta: &[u8]) -> Result<usize> {
    let mut size = base_len as i64;
    let mut off = 0usize;
    while off < delta.len() {
        if delta.len() - off < HUNK_HEADER_SIZE {
            return Err(RevlogError::CorruptFormat(
                "truncated delta hunk header".into(),
            ));
        }
        let start = read_i32(delta, off)? as i64;
        let end = read_i32(delta, off + 4)? as i64;
        let data_len = read_i32(delta, off + 8)? as i64;
        if start < 0 || end < start || data_len < 0 {
            return Err(RevlogError::CorruptFormat(
                "delta hunk header out of range".into(),
            ));
        }
        size += data_len - (end - start);
        off += HUNK_HEADER_SIZE + data_len as usize;
    }
    usize::try_from(size)
        .map_err(|_| RevlogError::CorruptFormat("delta shrinks base below zero".into()))
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32> {
    let bytes: [u8; 4] = buf
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| RevlogError::CorruptFormat("delta header read out of bounds".into()))?;
    Ok(i32::from_be_bytes(bytes))
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| RevlogError::InvalidArgument(format!("{what} does not fit into i32")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_then_patch_round_trips() {
        let old = b"one\ntwo\nthree\n".to_vec();
        let new = b"one\n2\nthree\n".to_vec();
        let delta = text_diff(&old, &new).unwrap();
        assert_eq!(patch(&old, &delta).unwrap(), new);
    }

    #[test]
    fn identical_texts_produce_empty_delta() {
        let text = b"same\nlines\n";
        assert!(text_diff(text, text).unwrap().is_empty());
        assert_eq!(patch(text, &[]).unwrap(), text);
    }

    #[test]
    fn diff_handles_empty_sides() {
        let text = b"content\n".to_vec();
        let grow = text_diff(b"", &text).unwrap();
        assert_eq!(patch(b"", &grow).unwrap(), text);
        let shrink = text_diff(&text, b"").unwrap();
        assert_eq!(patch(&text, &shrink).unwrap(), b"");
    }

    #[test]
    fn diff_handles_prepended_content() {
        // The old text is a byte-suffix of the new one; the common suffix
        // covers all of `old` and the hunk inserts at offset 0.
        let old = b"hello\n".to_vec();
        let new = b"x\nhello\n".to_vec();
        let delta = text_diff(&old, &new).unwrap();
        assert_eq!(patch(&old, &delta).unwrap(), new);

        let delta = text_diff(b"a", b"ba").unwrap();
        assert_eq!(patch(b"a", &delta).unwrap(), b"ba");

        // Mirror case: the new text is a byte-suffix of the old one.
        let delta = text_diff(&new, &old).unwrap();
        assert_eq!(patch(&new, &delta).unwrap(), old);
    }

    #[test]
    fn replacement_diff_is_recognized() {
        let base = b"old old old\n";
        let new = b"replacement\n";
        let mut delta = replace_diff_header(base.len(), new.len()).unwrap().to_vec();
        delta.extend_from_slice(new);
        assert!(is_replacement_diff(&delta, base.len()));
        assert!(!is_replacement_diff(&delta, base.len() + 1));
        assert_eq!(patch(base, &delta).unwrap(), new);
    }

    #[test]
    fn patched_size_matches_patch_output() {
        let old = b"a\nb\nc\n".to_vec();
        let new = b"a\nB\nBB\nc\n".to_vec();
        let delta = text_diff(&old, &new).unwrap();
        assert_eq!(patched_size(old.len(), &delta).unwrap(), new.len());
    }

    #[test]
    fn patch_rejects_truncated_delta() {
        let err = patch(b"base", &[0u8; 7]).unwrap_err();
        assert!(matches!(err, RevlogError::CorruptFormat(_)));
    }

    #[test]
    fn patch_rejects_out_of_bounds_hunk() {
        let mut delta = Vec::new();
        delta.extend_from_slice(&0i32.to_be_bytes());
        delta.extend_from_slice(&99i32.to_be_bytes());
        delta.extend_from_slice(&0i32.to_be_bytes());
        let err = patch(b"short", &delta).unwrap_err();
        assert!(matches!(err, RevlogError::CorruptFormat(_)));
    }
}
