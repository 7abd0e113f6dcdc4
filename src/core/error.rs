//! SC-007: Error taxonomy for signatures, captures, engines, and the cache.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ScriptError>;

#[derive(Debug, Error)]
pub enum ScriptError {
    /// Arguments do not fit the declared signature.
    #[error("Incompatible parameter: ({args}) for {signature}")]
    IncompatibleParameter { args: String, signature: String },

    /// A body produced a value the signature does not permit.
    #[error("Invalid return value '{value}' for {signature}")]
    InvalidReturn { value: String, signature: String },

    /// A frozen variable no longer matches at re-specialization.
    #[error("Incompatible frozen variable type '{required}' need but '{found}' found for '{name}'")]
    IncompatibleCapture {
        name: String,
        required: String,
        found: String,
    },

    #[error("mal-formed compiled data in '{artifact}': {reason}")]
    MalformedCache { artifact: String, reason: String },

    /// The cached artifact is not fresh and recompilation is disabled.
    #[error("compiled data of '{artifact}' is {state} and recompilation is disabled")]
    Stale { artifact: String, state: String },

    #[error("engine '{engine}' failed: {message}")]
    Engine { engine: String, message: String },

    #[error("unknown engine '{0}'")]
    UnknownEngine(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("unknown type name '{0}'")]
    UnknownType(String),

    #[error("executable kind '{0}' is not supported")]
    KindNotSupported(String),

    #[error("scope error: {0}")]
    Scope(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A recompiled artifact could not be written back.
    #[error("cannot persist '{artifact}': {message}")]
    Persist { artifact: String, message: String },

    #[error("config error: {0}")]
    Config(String),
}

impl ScriptError {
    /// Wrap an engine-side failure message.
    pub fn engine(engine: &str, message: impl Into<String>) -> Self {
        ScriptError::Engine {
            engine: engine.to_string(),
            message: message.into(),
        }
    }

    /// True for the errors a caller can recover from by recompiling.
    pub fn is_cache_condition(&self) -> bool {
        matches!(
            self,
            ScriptError::MalformedCache { .. } | ScriptError::Stale { .. }
        )
    }
}

impl From<bincode::Error> for ScriptError {
    fn from(e: bincode::Error) -> Self {
        ScriptError::Codec(e.to_string())
    }
}
