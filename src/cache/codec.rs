//! SC-021: Binary envelope and base64 block encoding.
//!
//! The compiled-data region is a versioned bincode envelope
//! `{version, engine, parameter, payload}`. The payload is framed by the
//! engine (bincode by default) and carries the executable record plus the
//! digest of the source it was compiled from.

use crate::core::error::{Result, ScriptError};
use crate::core::executable::ExecutableRecord;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const ENVELOPE_VERSION: u16 = 1;

/// Base64 line width inside the compiled block.
pub const BASE64_WIDTH: usize = 76;

pub const BLOCK_OPEN: &str = "##:COMPILED::BASE64 {";
pub const BLOCK_CLOSE: &str = "}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub engine: String,
    pub parameter: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub executable: ExecutableRecord,
    pub source_digest: String,
}

pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>> {
    Ok(bincode::serialize(payload)?)
}

pub fn decode_payload(bytes: &[u8]) -> Result<Payload> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(bincode::serialize(envelope)?)
}

/// Decode an envelope, rejecting unknown versions.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = bincode::deserialize(bytes)?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(ScriptError::Codec(format!(
            "unsupported envelope version {} (expected {})",
            envelope.version, ENVELOPE_VERSION
        )));
    }
    Ok(envelope)
}

/// `##:COMPILED::BASE64 {\n<base64, 76 columns>\n}`
pub fn compiled_block(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut block = String::with_capacity(encoded.len() + encoded.len() / BASE64_WIDTH + 32);
    block.push_str(BLOCK_OPEN);
    block.push('\n');
    for (i, line) in encoded.as_bytes().chunks(BASE64_WIDTH).enumerate() {
        if i != 0 {
            block.push('\n');
        }
        // base64 output is ASCII
        block.extend(line.iter().map(|&b| char::from(b)));
    }
    block.push('\n');
    block.push_str(BLOCK_CLOSE);
    block
}

/// Inverse of `compiled_block`.
pub fn decode_block(block: &str) -> Result<Vec<u8>> {
    let body = block
        .strip_prefix(BLOCK_OPEN)
        .and_then(|b| b.strip_prefix('\n'))
        .and_then(|b| b.strip_suffix(BLOCK_CLOSE))
        .and_then(|b| b.strip_suffix('\n'))
        .ok_or_else(|| ScriptError::Codec("compiled block delimiters not found".to_string()))?;
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ScriptError::Codec(format!("base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sc021_block_shape() {
        let bytes: Vec<u8> = (0..=255).collect();
        let block = compiled_block(&bytes);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], BLOCK_OPEN);
        assert_eq!(*lines.last().unwrap(), BLOCK_CLOSE);
        for line in &lines[1..lines.len() - 1] {
            assert!(line.len() <= BASE64_WIDTH);
        }
        assert_eq!(lines[1].len(), BASE64_WIDTH);
        assert_eq!(decode_block(&block).unwrap(), bytes);
    }

    #[test]
    fn test_sc021_block_prefix_is_22_chars() {
        let block = compiled_block(b"x");
        assert_eq!(block.find('\n').map(|i| i + 1), Some(22));
        assert!(block.ends_with("\n}"));
    }

    #[test]
    fn test_sc021_decode_block_rejects_garbage() {
        assert!(decode_block("nope").is_err());
        let bad = format!("{}\n!!!!\n{}", BLOCK_OPEN, BLOCK_CLOSE);
        assert!(decode_block(&bad).is_err());
    }

    #[test]
    fn test_sc021_envelope_version_checked() {
        let env = Envelope {
            version: ENVELOPE_VERSION + 1,
            engine: "RPN".into(),
            parameter: None,
            payload: vec![1, 2, 3],
        };
        let bytes = encode_envelope(&env).unwrap();
        assert!(matches!(decode_envelope(&bytes), Err(ScriptError::Codec(_))));

        let env = Envelope {
            version: ENVELOPE_VERSION,
            ..env
        };
        let bytes = encode_envelope(&env).unwrap();
        assert_eq!(decode_envelope(&bytes).unwrap(), env);
    }

    #[test]
    fn test_sc021_truncated_envelope_fails() {
        let env = Envelope {
            version: ENVELOPE_VERSION,
            engine: "RPN".into(),
            parameter: Some("x".into()),
            payload: vec![9; 40],
        };
        let bytes = encode_envelope(&env).unwrap();
        assert!(decode_envelope(&bytes[..bytes.len() / 2]).is_err());
    }
}
