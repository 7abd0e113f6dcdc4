//! SC-022: Compiled-artifact trailer — merge, extract, validate.
//!
//! A cached artifact is the source text followed by an engine comment that
//! holds the compiled block and its integrity lines:
//!
//! ```text
//! <source, padded to end with three newlines>
//! /*****...
//! ##:COMPILED::BASE64 {
//! <base64>
//! }
//! ##:HASHES:0x<digest(source)>-0x<digest(block)>;
//! ##:COUNTS:0x<len(source)>-0x<len(block)+1>;
//! *****.../
//! ```
//!
//! Lengths are UTF-16 code units and are the authoritative offsets on read.

use crate::cache::codec::{self, Envelope, Payload, BLOCK_OPEN};
use crate::cache::digest::{byte_offset, floor_byte_offset, hash_text, unit_offset, utf16_len};
use crate::core::error::{Result, ScriptError};
use crate::core::executable::Executable;
use crate::engine::{Engine, Registry};
use std::fmt;

/// Width of the trailer comment's rule lines.
pub const COMMENT_WIDTH: usize = 80;

const COUNTS_PREFIX: &str = "\n##:COUNTS:0x";
const HASHES_PREFIX: &str = "\n##:HASHES:0x";
const FIELD: usize = 8;

/// Outcome of checking a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Fresh,
    NoTrailer,
    Malformed(String),
    /// The source region was edited since compilation.
    StaleSource,
    /// The compiled region was altered or is internally inconsistent.
    StaleCompiled,
}

impl Validation {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Validation::Fresh)
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "FRESH"),
            Self::NoTrailer => write!(f, "NO_TRAILER"),
            Self::Malformed(reason) => write!(f, "MALFORMED ({})", reason),
            Self::StaleSource => write!(f, "STALE_SOURCE"),
            Self::StaleCompiled => write!(f, "STALE_COMPILED"),
        }
    }
}

/// Ensure `text` ends with at least three newlines.
pub fn pad_source(text: &str) -> String {
    let trailing = text.chars().rev().take(3).take_while(|&c| c == '\n').count();
    let mut padded = String::with_capacity(text.len() + 3);
    padded.push_str(text);
    for _ in trailing..3 {
        padded.push('\n');
    }
    padded
}

/// Append the compiled form of `executable` to `code`.
///
/// Engines that cannot compile, or whose compiled code cannot be stored,
/// get the padded source only.
pub fn merge(code: &str, executable: &Executable) -> Result<String> {
    let text = pad_source(code);
    let engine = executable.engine();
    if !engine.is_compilable() || !engine.is_compiled_code_serializable() {
        return Ok(text);
    }

    let payload = engine.write_payload(&Payload {
        executable: executable.record()?,
        source_digest: hash_text(&text),
    })?;
    let envelope = codec::encode_envelope(&Envelope {
        version: codec::ENVELOPE_VERSION,
        engine: engine.name().to_string(),
        parameter: engine.parameter().map(str::to_string),
        payload,
    })?;
    let block = codec::compiled_block(&envelope);
    Ok(seal(&text, &block, engine.as_ref()))
}

/// Join padded `text` and a compiled `block` under the integrity lines.
fn seal(text: &str, block: &str, engine: &dyn Engine) -> String {
    let trailer = format!(
        "{}\n##:HASHES:0x{}-0x{};\n##:COUNTS:0x{:>8X}-0x{:>8X};",
        block,
        hash_text(text),
        hash_text(block),
        utf16_len(text),
        utf16_len(block) + 1
    );
    format!("{}\n{}", text, engine.long_comments(&trailer, COMMENT_WIDTH))
}

/// Result of reading an artifact.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub validation: Validation,
    /// Code to use (and to recompile when not fresh).
    pub code: String,
    /// Present only when fresh.
    pub executable: Option<Executable>,
}

struct Trailer<'t> {
    code: &'t str,
    block: &'t str,
    hashes_at: usize,
    /// The recorded source length falls inside a character, so the source
    /// cannot be the one that was compiled.
    code_split: bool,
    source_digest: &'t str,
    block_digest: &'t str,
}

fn hex_field(text: &str, at: usize) -> std::result::Result<usize, String> {
    let raw = text
        .get(at..at + FIELD)
        .ok_or_else(|| "truncated length field".to_string())?;
    usize::from_str_radix(raw.trim(), 16).map_err(|_| format!("bad length field '{}'", raw))
}

fn parse_trailer(text: &str, counts_at: usize) -> std::result::Result<Trailer<'_>, String> {
    if text[counts_at + 1..].matches('\n').count() != 1 {
        return Err("counts line must be followed by exactly one line".to_string());
    }
    if !text[counts_at..].starts_with(COUNTS_PREFIX) {
        return Err("counts line has no 0x field".to_string());
    }
    let first = counts_at + COUNTS_PREFIX.len();
    let source_len = hex_field(text, first)?;
    if text.get(first + FIELD..first + FIELD + 3) != Some("-0x") {
        return Err("counts separator missing".to_string());
    }
    let block_len = hex_field(text, first + FIELD + 3)?;

    let total = utf16_len(text);
    if block_len == 0 {
        return Err("compiled length is zero".to_string());
    }
    if source_len >= total || block_len >= total {
        return Err(format!(
            "recorded lengths {}/{} exceed artifact length {}",
            source_len, block_len, total
        ));
    }

    let hashes_at = text[..counts_at]
        .rfind('\n')
        .filter(|&i| text[i..].starts_with(HASHES_PREFIX))
        .ok_or_else(|| "hashes line missing".to_string())?;
    let h = hashes_at + HASHES_PREFIX.len();
    let source_digest = text
        .get(h..h + FIELD)
        .ok_or_else(|| "truncated source digest".to_string())?;
    if text.get(h + FIELD..h + FIELD + 3) != Some("-0x") {
        return Err("hashes separator missing".to_string());
    }
    let block_digest = text
        .get(h + FIELD + 3..h + 2 * FIELD + 3)
        .ok_or_else(|| "truncated block digest".to_string())?;

    let block_start_units = (unit_offset(text, hashes_at) + 1)
        .checked_sub(block_len)
        .ok_or_else(|| "compiled length reaches before the artifact start".to_string())?;
    let block_start = byte_offset(text, block_start_units)
        .ok_or_else(|| "compiled length splits a character".to_string())?;
    let code_end =
        floor_byte_offset(text, source_len).ok_or_else(|| "source length exceeds the artifact".to_string())?;
    let code_split = unit_offset(text, code_end) != source_len;

    Ok(Trailer {
        code: text.get(..code_end).ok_or_else(|| "source length splits a character".to_string())?,
        block: text
            .get(block_start..hashes_at)
            .ok_or_else(|| "compiled length ends past the hashes line".to_string())?,
        hashes_at,
        code_split,
        source_digest,
        block_digest,
    })
}

/// Source that precedes the last compiled block opening before `before`.
///
/// The trailer comment starts `COMMENT_WIDTH` columns before the block, so
/// the code ends at the last newline ahead of that margin. With no block
/// opening at all the whole text is returned.
fn code_before_trailer(text: &str, before: usize) -> String {
    let anchor = text[..before]
        .match_indices(BLOCK_OPEN)
        .map(|(i, _)| i)
        .filter(|&i| i > 0 && text[..i].ends_with('\n'))
        .last();
    let Some(block_start) = anchor else {
        return text.to_string();
    };
    let mut limit = (block_start + 3).saturating_sub(COMMENT_WIDTH).min(text.len());
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    match text[..limit].rfind('\n') {
        Some(end) => text[..end].to_string(),
        None => String::new(),
    }
}

fn decode(trailer: &Trailer<'_>, registry: &Registry) -> Result<Executable> {
    let bytes = codec::decode_block(trailer.block)?;
    let envelope = codec::decode_envelope(&bytes)?;
    let engine = registry.resolve(&envelope.engine, envelope.parameter.as_deref())?;
    let payload = engine.read_payload(&envelope.payload)?;
    if payload.source_digest != trailer.source_digest {
        return Err(ScriptError::Codec(format!(
            "payload digest 0x{} does not match trailer 0x{}",
            payload.source_digest.trim(),
            trailer.source_digest.trim()
        )));
    }
    Executable::from_record(payload.executable, engine)
}

/// Read and validate the trailer of `text`.
///
/// Never fails: decode errors degrade to `StaleCompiled`.
pub fn extract(text: &str, registry: &Registry) -> Extraction {
    let Some(counts_at) = text.rfind("\n##:COUNTS:") else {
        return Extraction {
            validation: Validation::NoTrailer,
            code: text.to_string(),
            executable: None,
        };
    };

    let trailer = match parse_trailer(text, counts_at) {
        Ok(t) => t,
        Err(reason) => {
            log::debug!("mal-formed trailer: {}", reason);
            return Extraction {
                validation: Validation::Malformed(reason),
                code: code_before_trailer(text, counts_at),
                executable: None,
            };
        }
    };

    let source_changed = trailer.code_split || trailer.source_digest != hash_text(trailer.code);
    let block_changed = trailer.block_digest != hash_text(trailer.block);
    if source_changed || block_changed {
        return Extraction {
            validation: if source_changed {
                Validation::StaleSource
            } else {
                Validation::StaleCompiled
            },
            code: code_before_trailer(text, trailer.hashes_at),
            executable: None,
        };
    }

    match decode(&trailer, registry) {
        Ok(executable) => Extraction {
            validation: Validation::Fresh,
            code: trailer.code.to_string(),
            executable: Some(executable),
        },
        Err(e) => {
            log::debug!("compiled block rejected: {}", e);
            // source digest already matched, so the recorded slice is the code
            Extraction {
                validation: Validation::StaleCompiled,
                code: trailer.code.to_string(),
                executable: None,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Recompile when the artifact is not fresh.
    pub recompile: bool,
    /// Recompile even when it is.
    pub force: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            recompile: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    /// `None` only when degraded to source-only.
    pub executable: Option<Executable>,
    pub code: String,
    pub validation: Validation,
    pub rebuilt: bool,
}

/// Extract, then recompile if needed and allowed.
///
/// A malformed trailer with recompilation disabled is an error; other
/// non-fresh states degrade to source-only.
pub fn resolve_text(name: &str, text: &str, registry: &Registry, options: ResolveOptions) -> Result<Resolved> {
    let Extraction {
        validation,
        code,
        executable,
    } = extract(text, registry);

    if executable.is_some() && !options.force {
        return Ok(Resolved {
            executable,
            code,
            validation,
            rebuilt: false,
        });
    }

    if options.force || options.recompile {
        log::info!("{}: {}, recompiling", name, validation);
        let code = pad_source(&code);
        let executable = registry.compile(name, &code)?;
        return Ok(Resolved {
            executable: Some(executable),
            code,
            validation,
            rebuilt: true,
        });
    }

    if let Validation::Malformed(reason) = &validation {
        return Err(ScriptError::MalformedCache {
            artifact: name.to_string(),
            reason: reason.clone(),
        });
    }
    log::warn!("{}: {}, serving source only", name, validation);
    Ok(Resolved {
        executable: None,
        code,
        validation,
        rebuilt: false,
    })
}

/// Recompile `text` from its source region and merge the result.
pub fn compile_to_text(name: &str, text: &str, registry: &Registry) -> Result<(Executable, String)> {
    let code = pad_source(&extract(text, registry).code);
    let executable = registry.compile(name, &code)?;
    let merged = merge(&code, &executable)?;
    Ok((executable, merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Value;

    const ADD: &str = "// @RPN:\n// { function (a:Integer, b:Integer):Integer }\na b +\n";

    fn registry() -> Registry {
        Registry::with_builtins()
    }

    fn merged(code: &str) -> (Executable, String) {
        let exec = registry().compile("add.rpn", code).unwrap();
        let text = merge(code, &exec).unwrap();
        (exec, text)
    }

    #[test]
    fn test_sc022_pad_source() {
        assert_eq!(pad_source("S"), "S\n\n\n");
        assert_eq!(pad_source("S\n"), "S\n\n\n");
        assert_eq!(pad_source("S\n\n\n\n"), "S\n\n\n\n");
        assert_eq!(pad_source(""), "\n\n\n");
    }

    #[test]
    fn test_sc022_merge_layout() {
        let (_, text) = merged(ADD);
        assert!(text.starts_with(ADD));
        let lines: Vec<&str> = text.lines().collect();
        let n = lines.len();
        assert!(lines[n - 1].ends_with("*/"));
        assert_eq!(lines[n - 1].len(), COMMENT_WIDTH);
        assert!(lines[n - 2].starts_with("##:COUNTS:0x"));
        assert!(lines[n - 2].ends_with(';'));
        assert!(lines[n - 3].starts_with("##:HASHES:0x"));
        assert_eq!(lines[n - 4], "}");
        assert!(lines.contains(&BLOCK_OPEN));
        let counts = lines[n - 2];
        let source_len = usize::from_str_radix(counts[12..20].trim(), 16).unwrap();
        assert_eq!(source_len, utf16_len(&pad_source(ADD)));
    }

    #[test]
    fn test_sc022_roundtrip_is_fresh() {
        let (exec, text) = merged(ADD);
        let out = extract(&text, &registry());
        assert_eq!(out.validation, Validation::Fresh);
        assert_eq!(out.code, pad_source(ADD));
        let back = out.executable.unwrap();
        assert_eq!(back, exec);
        assert_eq!(back.run(&[Value::Int(20), Value::Int(22)]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_sc022_no_trailer() {
        let out = extract(ADD, &registry());
        assert_eq!(out.validation, Validation::NoTrailer);
        assert_eq!(out.code, ADD);
        assert!(out.executable.is_none());
    }

    #[test]
    fn test_sc022_source_edit_is_stale_source() {
        let (_, text) = merged(ADD);
        let edited = text.replacen("a b +", "a b *", 1);
        let out = extract(&edited, &registry());
        assert_eq!(out.validation, Validation::StaleSource);
        assert_eq!(out.code, pad_source(ADD).replacen("a b +", "a b *", 1));
    }

    #[test]
    fn test_sc022_source_growth_recovers_code_by_margin() {
        let (_, text) = merged(ADD);
        let edited = text.replacen("a b +", "a b + 1 +", 1);
        let out = extract(&edited, &registry());
        assert_eq!(out.validation, Validation::StaleSource);
        assert!(out.code.ends_with("a b + 1 +\n\n\n"));
        assert!(!out.code.contains("##:"));
    }

    #[test]
    fn test_sc022_block_edit_is_stale_compiled() {
        let (_, text) = merged(ADD);
        let open = text.find(BLOCK_OPEN).unwrap() + BLOCK_OPEN.len() + 1;
        let mut bytes = text.clone().into_bytes();
        bytes[open + 5] = if bytes[open + 5] == b'A' { b'B' } else { b'A' };
        let edited = String::from_utf8(bytes).unwrap();
        let out = extract(&edited, &registry());
        assert_eq!(out.validation, Validation::StaleCompiled);
        assert_eq!(out.code, pad_source(ADD));
    }

    #[test]
    fn test_sc022_length_past_end_is_malformed() {
        let (_, text) = merged(ADD);
        let at = text.rfind("\n##:COUNTS:0x").unwrap() + 13;
        let edited = format!("{}FFFFFFF0{}", &text[..at], &text[at + 8..]);
        let out = extract(&edited, &registry());
        assert!(matches!(out.validation, Validation::Malformed(_)));
        assert_eq!(out.code, pad_source(ADD));
    }

    #[test]
    fn test_sc022_zero_block_length_is_malformed() {
        let (_, text) = merged(ADD);
        let at = text.rfind("\n##:COUNTS:0x").unwrap() + 13 + 8 + 3;
        let edited = format!("{}       0{}", &text[..at], &text[at + 8..]);
        let out = extract(&edited, &registry());
        assert!(matches!(out.validation, Validation::Malformed(_)));
        assert_eq!(out.code, pad_source(ADD));
        assert!(out.executable.is_none());
    }

    #[test]
    fn test_sc022_source_edit_splitting_a_character_is_stale_source() {
        let (_, text) = merged(ADD);
        let last_pad = pad_source(ADD).len() - 1;
        let edited = format!("{}\u{1F600}{}", &text[..last_pad], &text[last_pad + 1..]);
        let out = extract(&edited, &registry());
        assert_eq!(out.validation, Validation::StaleSource);
        assert!(out.code.starts_with(ADD));

        let off = ResolveOptions {
            recompile: false,
            force: false,
        };
        let r = resolve_text("add.rpn", &edited, &registry(), off).unwrap();
        assert!(r.executable.is_none());
        assert_eq!(r.validation, Validation::StaleSource);
    }

    #[test]
    fn test_sc022_unparsable_counts_is_malformed() {
        let (_, text) = merged(ADD);
        let edited = text.replacen("##:COUNTS:0x", "##:COUNTS:0xZZ", 1);
        assert!(matches!(
            extract(&edited, &registry()).validation,
            Validation::Malformed(_)
        ));
        let trailing = format!("{}\n", text);
        assert!(matches!(
            extract(&trailing, &registry()).validation,
            Validation::Malformed(_)
        ));
    }

    #[test]
    fn test_sc022_inner_digest_mismatch_is_stale_compiled() {
        // outer lines are consistent, the payload claims other source
        let exec = registry().compile("add.rpn", ADD).unwrap();
        let payload = codec::encode_payload(&Payload {
            executable: exec.record().unwrap(),
            source_digest: hash_text("something else"),
        })
        .unwrap();
        let envelope = codec::encode_envelope(&Envelope {
            version: codec::ENVELOPE_VERSION,
            engine: "RPN".to_string(),
            parameter: None,
            payload,
        })
        .unwrap();
        let text = seal(&pad_source(ADD), &codec::compiled_block(&envelope), exec.engine().as_ref());
        let out = extract(&text, &registry());
        assert_eq!(out.validation, Validation::StaleCompiled);
        assert_eq!(out.code, pad_source(ADD));
    }

    #[test]
    fn test_sc022_unknown_engine_is_stale_compiled() {
        let (_, text) = merged(ADD);
        let out = extract(&text, &Registry::new());
        assert_eq!(out.validation, Validation::StaleCompiled);
        assert!(out.executable.is_none());
    }

    #[test]
    fn test_sc022_non_serializable_engine_emits_source_only() {
        let code = "// @RPN(interpret):\nS\n";
        let exec = registry().compile("s.rpn", code).unwrap();
        let text = merge(code, &exec).unwrap();
        assert_eq!(text, pad_source(code));
        for _ in 0..2 {
            let r = resolve_text("s.rpn", &text, &registry(), ResolveOptions::default()).unwrap();
            assert_eq!(r.validation, Validation::NoTrailer);
            assert!(r.rebuilt);
        }
    }

    #[test]
    fn test_sc022_resolve_fresh_does_not_rebuild() {
        let (_, text) = merged(ADD);
        let r = resolve_text("add.rpn", &text, &registry(), ResolveOptions::default()).unwrap();
        assert!(!r.rebuilt);
        assert!(r.validation.is_fresh());
        let forced = resolve_text(
            "add.rpn",
            &text,
            &registry(),
            ResolveOptions {
                recompile: false,
                force: true,
            },
        )
        .unwrap();
        assert!(forced.rebuilt);
    }

    #[test]
    fn test_sc022_resolve_without_recompile() {
        let off = ResolveOptions {
            recompile: false,
            force: false,
        };
        let r = resolve_text("add.rpn", ADD, &registry(), off).unwrap();
        assert!(r.executable.is_none());
        assert_eq!(r.validation, Validation::NoTrailer);

        let (_, text) = merged(ADD);
        let at = text.rfind("\n##:COUNTS:0x").unwrap() + 13;
        let broken = format!("{}FFFFFFF0{}", &text[..at], &text[at + 8..]);
        assert!(matches!(
            resolve_text("add.rpn", &broken, &registry(), off),
            Err(ScriptError::MalformedCache { .. })
        ));
    }

    #[test]
    fn test_sc022_compile_error_is_fatal() {
        let bad = "// @RPN:\n1 @ 2\n";
        assert!(resolve_text("bad.rpn", bad, &registry(), ResolveOptions::default()).is_err());
    }

    #[test]
    fn test_sc022_compile_to_text_replaces_stale_trailer() {
        let (_, text) = merged(ADD);
        let edited = text.replacen("a b +", "a b -", 1);
        let (exec, rewritten) = compile_to_text("add.rpn", &edited, &registry()).unwrap();
        assert_eq!(rewritten.matches(BLOCK_OPEN).count(), 1);
        let out = extract(&rewritten, &registry());
        assert_eq!(out.validation, Validation::Fresh);
        assert_eq!(exec.run(&[Value::Int(5), Value::Int(3)]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_sc022_non_ascii_source_counts_utf16() {
        let code = "// @RPN:\n// { script }\n\"h\u{e9}llo \u{1F600}\" len\n";
        let (_, text) = merged(code);
        let out = extract(&text, &registry());
        assert_eq!(out.validation, Validation::Fresh);
        assert_eq!(out.code, pad_source(code));
    }
}
