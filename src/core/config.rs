//! SC-008: Load policy — YAML parsing and validation.
//!
//! ```yaml
//! recompile: true        # rebuild artifacts that are not fresh
//! write_back: true       # persist rebuilt artifacts to writable stores
//! force_recompile: false # rebuild even fresh artifacts
//! default_engine: RPN    # engine for scripts without a marker
//! ```

use super::error::{Result, ScriptError};
use crate::engine::Registry;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadPolicy {
    #[serde(default = "yes")]
    pub recompile: bool,

    #[serde(default = "yes")]
    pub write_back: bool,

    #[serde(default)]
    pub force_recompile: bool,

    #[serde(default)]
    pub default_engine: Option<String>,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            recompile: true,
            write_back: true,
            force_recompile: false,
            default_engine: None,
        }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a policy from a YAML string.
pub fn parse_policy(yaml: &str) -> Result<LoadPolicy> {
    if yaml.trim().is_empty() {
        return Ok(LoadPolicy::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| ScriptError::Config(format!("YAML parse error: {}", e)))
}

/// Parse a policy file from disk.
pub fn parse_policy_file(path: &Path) -> Result<LoadPolicy> {
    let content = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_policy(&content).map_err(|e| ScriptError::Config(format!("{}: {}", path.display(), e)))
}

/// Policy from `path` if given and present, else the defaults.
pub fn load_policy(path: Option<&Path>) -> Result<LoadPolicy> {
    match path {
        Some(p) if p.exists() => parse_policy_file(p),
        Some(p) => {
            log::debug!("no policy file at {}, using defaults", p.display());
            Ok(LoadPolicy::default())
        }
        None => Ok(LoadPolicy::default()),
    }
}

/// Validate a policy against the engines available. Empty = valid.
pub fn validate_policy(policy: &LoadPolicy, registry: &Registry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if policy.force_recompile && !policy.recompile {
        errors.push(ValidationError {
            message: "force_recompile requires recompile: true".to_string(),
        });
    }

    if let Some(name) = &policy.default_engine {
        if name.trim().is_empty() {
            errors.push(ValidationError {
                message: "default_engine must not be empty".to_string(),
            });
        } else if registry.get(name).is_none() {
            let known: Vec<&str> = registry.names().collect();
            errors.push(ValidationError {
                message: format!(
                    "default_engine '{}' is not registered (known: {})",
                    name,
                    known.join(", ")
                ),
            });
        }
    }

    errors
}
