//! SC-020: Change-detection digests.
//!
//! The trailer digest is the additive UTF-16 code-unit sum of a text,
//! rendered as 8 space-padded upper-case hex digits. It is a checksum for
//! edits, not a security control. Artifact fingerprints in load reports use
//! BLAKE3.

use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Additive digest of `text`, e.g. `"     1F6"`.
pub fn hash_text(text: &str) -> String {
    let sum = text
        .encode_utf16()
        .fold(0i32, |acc, unit| acc.wrapping_add(i32::from(unit)));
    let sum = if sum < 1 { sum.wrapping_neg() } else { sum };
    format!("{:>8X}", sum as u32)
}

/// Length of `text` in UTF-16 code units, the unit the trailer counts in.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Byte offset of the `units`-th UTF-16 code unit.
///
/// `None` past the end or inside a surrogate pair.
pub fn byte_offset(text: &str, units: usize) -> Option<usize> {
    let mut seen = 0;
    for (i, c) in text.char_indices() {
        if seen == units {
            return Some(i);
        }
        if seen > units {
            return None;
        }
        seen += c.len_utf16();
    }
    (seen == units).then_some(text.len())
}

/// Like `byte_offset`, but an offset inside a surrogate pair moves back to
/// the start of that character.
pub fn floor_byte_offset(text: &str, units: usize) -> Option<usize> {
    let mut seen = 0;
    for (i, c) in text.char_indices() {
        let next = seen + c.len_utf16();
        if next > units {
            return Some(i);
        }
        seen = next;
    }
    (seen == units).then_some(text.len())
}

/// Number of UTF-16 code units before byte offset `byte`.
pub fn unit_offset(text: &str, byte: usize) -> usize {
    utf16_len(&text[..byte.min(text.len())])
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn fingerprint(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn fingerprint_file(path: &Path) -> Result<String, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}
