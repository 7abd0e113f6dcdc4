//! SC-006: Script header parsing.
//!
//! A script names its engine with a marker such as `// @RPN:` or
//! `// @RPN(interpret):`, and may declare what it compiles to with an info
//! block such as `{ function (a:Integer, b:String ...):Void }`. Leading lines
//! that end with `##` (shebang-style launch lines) are skipped by both.

use crate::core::error::{Result, ScriptError};
use crate::core::executable::ExecutableKind;
use crate::core::signature::Signature;
use crate::core::types::Type;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static ENGINE_MARKER: Lazy<std::result::Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(r"[^@\n]*@([a-zA-Z][a-zA-Z0-9]*(?:\.[a-zA-Z][a-zA-Z0-9]*)*)(\([^)\n]+\)|\(\))?:")
});

static INFO_BLOCK: Lazy<std::result::Result<Regex, regex::Error>> = Lazy::new(|| {
    Regex::new(
        r"\{[ \t]*([a-zA-Z]+)[ \t]*(\([^()\n]*\)[ \t]*:[ \t]*[a-zA-Z0-9$_.]+(?:[ \t]*\[[ \t]*\])*)?[ \t]*\}",
    )
});

static SIGNATURE: Lazy<std::result::Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^\s*\((.*)\)\s*:\s*(\S.*?)\s*$"));

fn pattern(
    re: &'static Lazy<std::result::Result<Regex, regex::Error>>,
) -> Result<&'static Regex> {
    re.as_ref()
        .map_err(|e| ScriptError::Config(format!("header pattern: {}", e)))
}

/// Byte offset of the first line that is not a `##`-terminated launch line.
pub fn end_of_ignored(code: &str) -> usize {
    let mut offset = 0;
    for line in code.split_inclusive('\n') {
        let Some(content) = line.strip_suffix('\n') else {
            break;
        };
        let content = content.strip_suffix('\r').unwrap_or(content);
        if !content.ends_with("##") {
            break;
        }
        offset += line.len();
    }
    offset
}

/// Engine name and optional parameter from the first marker in `code`.
pub fn engine_marker(code: &str) -> Option<(String, Option<String>)> {
    let re = pattern(&ENGINE_MARKER).ok()?;
    let caps = re.captures(&code[end_of_ignored(code)..])?;
    let name = caps.get(1)?.as_str().to_string();
    let param = caps.get(2).and_then(|m| {
        let inner = m.as_str().trim();
        let inner = inner
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(inner)
            .trim();
        (!inner.is_empty()).then(|| inner.to_string())
    });
    Some((name, param))
}

/// Parse `(name:Type, ..., last:Type ...):Return`.
///
/// Returns the signature and its parameter names. A parameter written as a
/// bare type gets the name `Param<i>`.
pub fn parse_signature(name: Option<&str>, text: &str) -> Result<(Signature, Vec<String>)> {
    let re = pattern(&SIGNATURE)?;
    let caps = re
        .captures(text)
        .ok_or_else(|| ScriptError::InvalidSignature(format!("cannot parse '{}'", text.trim())))?;
    let list = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
    let returns = Type::parse(caps.get(2).map(|m| m.as_str()).unwrap_or(""))?;

    let mut params = Vec::new();
    let mut names = Vec::new();
    let mut var_args = false;
    if !list.is_empty() {
        let pieces: Vec<&str> = list.split(',').map(str::trim).collect();
        let last = pieces.len() - 1;
        for (i, piece) in pieces.iter().enumerate() {
            let (pname, ptype) = match piece.split_once(':') {
                Some((n, t)) => (n.trim().to_string(), t.trim()),
                None => (format!("Param{}", i), *piece),
            };
            let ptype = match ptype.strip_suffix("...") {
                Some(element) if i == last => {
                    var_args = true;
                    element.trim()
                }
                Some(_) => {
                    return Err(ScriptError::InvalidSignature(format!(
                        "only the last parameter may be variable-arity in '{}'",
                        text.trim()
                    )))
                }
                None => ptype,
            };
            if pname.is_empty() {
                return Err(ScriptError::InvalidSignature(format!(
                    "parameter {} has no name in '{}'",
                    i,
                    text.trim()
                )));
            }
            params.push(Type::parse(ptype)?);
            names.push(pname);
        }
    }
    let signature = Signature::new(name, params, var_args, returns)?;
    Ok((signature, names))
}

/// Declared kind of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Script,
    Function,
    Macro,
    /// A function with the main signature unless one is given.
    Main,
}

impl InfoKind {
    pub fn parse(word: &str) -> Result<Self> {
        match word {
            "script" => Ok(InfoKind::Script),
            "function" => Ok(InfoKind::Function),
            "macro" => Ok(InfoKind::Macro),
            "main" => Ok(InfoKind::Main),
            other => Err(ScriptError::KindNotSupported(other.to_string())),
        }
    }
}

impl fmt::Display for InfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::Function => write!(f, "function"),
            Self::Macro => write!(f, "macro"),
            Self::Main => write!(f, "main"),
        }
    }
}

/// What a script compiles to.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableInfo {
    pub file_name: Option<String>,
    pub kind: InfoKind,
    pub signature: Option<Signature>,
    pub signature_text: String,
    pub param_names: Vec<String>,
}

impl ExecutableInfo {
    /// `main($Args:String ...):Void`
    pub fn main(file_name: Option<&str>) -> Self {
        Self {
            file_name: file_name.map(str::to_string),
            kind: InfoKind::Main,
            signature: Some(Signature::main()),
            signature_text: "($Args:String ...):Void".to_string(),
            param_names: vec!["$Args".to_string()],
        }
    }

    pub fn script(file_name: Option<&str>) -> Self {
        Self {
            file_name: file_name.map(str::to_string),
            kind: InfoKind::Script,
            signature: None,
            signature_text: String::new(),
            param_names: Vec::new(),
        }
    }

    pub fn executable_kind(&self) -> ExecutableKind {
        match self.kind {
            InfoKind::Script => ExecutableKind::Script,
            InfoKind::Function | InfoKind::Main => ExecutableKind::Function,
            InfoKind::Macro => ExecutableKind::Macro,
        }
    }

    /// Signature and parameter names, filling defaults for a missing signature.
    pub fn call_shape(&self) -> (Signature, Vec<String>) {
        match (&self.signature, self.kind) {
            (Some(sig), _) => (sig.clone(), self.param_names.clone()),
            (None, InfoKind::Main) => (Signature::main(), vec!["$Args".to_string()]),
            (None, _) => {
                let sig = Signature::free();
                let names = (0..sig.param_count()).map(|i| format!("Param{}", i)).collect();
                (sig, names)
            }
        }
    }
}

/// Find and parse the info block. `Ok(None)` when the script declares none.
pub fn parse_executable_info(file_name: Option<&str>, code: &str) -> Result<Option<ExecutableInfo>> {
    let re = pattern(&INFO_BLOCK)?;
    let Some(caps) = re.captures(&code[end_of_ignored(code)..]) else {
        return Ok(None);
    };
    let kind = InfoKind::parse(caps.get(1).map(|m| m.as_str()).unwrap_or(""))?;
    let signature_text = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();

    if signature_text.is_empty() {
        let info = match kind {
            InfoKind::Script => ExecutableInfo::script(file_name),
            InfoKind::Main => ExecutableInfo::main(file_name),
            _ => ExecutableInfo {
                file_name: file_name.map(str::to_string),
                kind,
                signature: None,
                signature_text,
                param_names: Vec::new(),
            },
        };
        return Ok(Some(info));
    }

    if kind == InfoKind::Script {
        return Err(ScriptError::InvalidSignature(format!(
            "a script takes no signature: '{}'",
            signature_text
        )));
    }
    let (signature, param_names) = parse_signature(file_name, &signature_text)?;
    Ok(Some(ExecutableInfo {
        file_name: file_name.map(str::to_string),
        kind,
        signature: Some(signature),
        signature_text,
        param_names,
    }))
}
