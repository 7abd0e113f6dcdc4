//! SC-010: Engines and the engine registry.
//!
//! An engine compiles script text into an executable body for one language.
//! Engines are looked up by name in an explicit `Registry` rather than
//! discovered at runtime.

pub mod rpn;

use crate::cache::codec::{self, Payload};
use crate::core::error::{Result, ScriptError};
use crate::core::executable::{Body, Executable, ExecutableKind, Parts};
use crate::core::frozen::FrozenVariableInfos;
use crate::core::header::{self, ExecutableInfo};
use crate::core::scope::{Scope, SimpleScope};
use crate::core::types::Value;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Input to one compile step.
pub struct CompileUnit<'a> {
    pub file_name: Option<&'a str>,
    /// Full script text, header lines included.
    pub code: &'a str,
    pub info: &'a ExecutableInfo,
    /// Parameter names of the target, empty for scripts.
    pub param_names: &'a [String],
}

/// Output of one compile step.
pub struct CompiledBody {
    pub body: Arc<dyn Body>,
    /// Names the body reads that are neither parameters nor locals.
    pub free_names: Vec<String>,
}

/// Compile/execute capability for one scripting language.
pub trait Engine: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn short_name(&self) -> &str {
        self.name()
    }

    /// Option string this instance was created with.
    fn parameter(&self) -> Option<&str> {
        None
    }

    /// Instance configured by the parameter of an `@Name(param):` marker.
    fn with_option(&self, param: Option<&str>) -> Result<Arc<dyn Engine>>;

    fn is_compilable(&self) -> bool {
        true
    }

    fn is_compiled_code_serializable(&self) -> bool {
        true
    }

    fn new_scope(&self) -> Box<dyn Scope> {
        Box::new(SimpleScope::new())
    }

    /// Wrap `text` in a block comment whose rule lines are `width` wide.
    fn long_comments(&self, text: &str, width: usize) -> String {
        let rule = "*".repeat(width.saturating_sub(1));
        format!("/{}\n{}\n{}/", rule, text, rule)
    }

    fn compile_body(&self, unit: &CompileUnit<'_>) -> Result<CompiledBody>;

    /// Reattach a body from an image produced by `Body::image`.
    fn load_body(&self, image: &[u8]) -> Result<Arc<dyn Body>>;

    fn write_payload(&self, payload: &Payload) -> Result<Vec<u8>> {
        codec::encode_payload(payload)
    }

    fn read_payload(&self, bytes: &[u8]) -> Result<Payload> {
        codec::decode_payload(bytes)
    }

    /// Info used when a script declares none.
    fn default_executable_info(&self, file_name: Option<&str>) -> ExecutableInfo {
        ExecutableInfo::main(file_name)
    }
}

/// Compile `code` with `engine`, capturing free names found in `scope`.
pub fn compile(
    engine: &Arc<dyn Engine>,
    file_name: Option<&str>,
    code: &str,
    scope: Option<&dyn Scope>,
) -> Result<Executable> {
    let info = match header::parse_executable_info(file_name, code)? {
        Some(info) => info,
        None => engine.default_executable_info(file_name),
    };
    let kind = info.executable_kind();
    let (signature, param_names) = match kind {
        ExecutableKind::Script => (None, Vec::new()),
        _ => {
            let (sig, names) = info.call_shape();
            (Some(sig), names)
        }
    };

    let compiled = engine.compile_body(&CompileUnit {
        file_name,
        code,
        info: &info,
        param_names: &param_names,
    })?;

    let captured_names: Vec<&str> = compiled
        .free_names
        .iter()
        .map(String::as_str)
        .filter(|n| scope.is_some_and(|s| s.exists(n)))
        .collect();
    let frozen = FrozenVariableInfos::new(captured_names, scope);
    let captured = match scope {
        Some(s) => frozen
            .names()
            .map(|n| (n.to_string(), s.value(n).unwrap_or(Value::Null)))
            .collect(),
        None => Vec::new(),
    };
    log::debug!(
        "compiled {} as {} with {} ({} frozen)",
        file_name.unwrap_or("<text>"),
        kind,
        engine.name(),
        frozen.len()
    );

    let parts = Parts {
        engine: engine.clone(),
        code: code.to_string(),
        frozen,
        captured,
        body: compiled.body,
    };
    match (kind, signature) {
        (ExecutableKind::Function, Some(sig)) => Executable::new_function(parts, sig, param_names),
        (ExecutableKind::Macro, Some(sig)) => Executable::new_macro(parts, sig, param_names),
        _ => Ok(Executable::new_script(parts)),
    }
}

/// Name → engine map, with short-name aliases.
#[derive(Default)]
pub struct Registry {
    engines: IndexMap<String, Arc<dyn Engine>>,
    aliases: FxHashMap<String, String>,
    default_engine: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled engines.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(rpn::RpnEngine::default()));
        registry
    }

    /// Add an engine. A later engine with the same name replaces the earlier.
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        let name = engine.name().to_string();
        let short = engine.short_name().to_string();
        if short != name {
            self.aliases.insert(short, name.clone());
        }
        self.engines.insert(name, engine);
    }

    /// Engine used for scripts without a marker.
    pub fn set_default_engine(&mut self, name: Option<&str>) -> Result<()> {
        if let Some(n) = name {
            if self.get(n).is_none() {
                return Err(ScriptError::UnknownEngine(n.to_string()));
            }
        }
        self.default_engine = name.map(str::to_string);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Engine>> {
        let canonical = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.engines.get(canonical).cloned()
    }

    /// Engine by name, configured with `param` when one is given.
    pub fn resolve(&self, name: &str, param: Option<&str>) -> Result<Arc<dyn Engine>> {
        let engine = self
            .get(name)
            .ok_or_else(|| ScriptError::UnknownEngine(name.to_string()))?;
        match param {
            Some(p) => engine.with_option(Some(p)),
            None => Ok(engine),
        }
    }

    /// Engine named by the marker in `code`, else the default engine.
    pub fn engine_for_code(&self, code: &str) -> Result<Arc<dyn Engine>> {
        match header::engine_marker(code) {
            Some((name, param)) => self.resolve(&name, param.as_deref()),
            None => match &self.default_engine {
                Some(name) => self.resolve(name, None),
                None => Err(ScriptError::UnknownEngine(
                    "no engine marker in script text".to_string(),
                )),
            },
        }
    }

    pub fn compile(&self, file_name: &str, code: &str) -> Result<Executable> {
        self.compile_in(file_name, code, None)
    }

    /// Compile capturing free names declared in `scope`.
    pub fn compile_in(&self, file_name: &str, code: &str, scope: Option<&dyn Scope>) -> Result<Executable> {
        let engine = self.engine_for_code(code)?;
        compile(&engine, Some(file_name), code, scope)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("engines", &self.engines.keys().collect::<Vec<_>>())
            .field("default_engine", &self.default_engine)
            .finish()
    }
}
