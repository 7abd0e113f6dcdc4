//! SC-005: The executable family — scripts, functions, and macros.
//!
//! Every executable knows its engine, its source code, its frozen-variable
//! set and the values captured for it. Functions and macros add a signature
//! and parameter names. The engine-specific part is the `Body`; after
//! deserialization only its compiled image is held and the body is
//! reattached on first invocation.

use crate::core::error::{Result, ScriptError};
use crate::core::frozen::FrozenVariableInfos;
use crate::core::scope::Scope;
use crate::core::signature::Signature;
use crate::core::types::{Type, Value};
use crate::engine::Engine;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Body and frame
// ============================================================================

/// Engine-produced executable body.
pub trait Body: Send + Sync + fmt::Debug {
    /// Serializable compiled image. The owning engine's `load_body` reverses it.
    fn image(&self) -> Result<Vec<u8>>;

    fn run(&self, frame: &mut Frame<'_, '_>) -> Result<Value>;
}

/// Name resolution for one invocation: parameters, then captured
/// variables, then the caller scope (macros and scripts only).
pub struct Frame<'a, 's> {
    param_names: &'a [String],
    args: &'a [Value],
    captured: &'a [(String, Value)],
    scope: Option<&'s mut dyn Scope>,
}

impl<'a, 's> Frame<'a, 's> {
    pub fn new(
        param_names: &'a [String],
        args: &'a [Value],
        captured: &'a [(String, Value)],
        scope: Option<&'s mut dyn Scope>,
    ) -> Self {
        Self {
            param_names,
            args,
            captured,
            scope,
        }
    }

    pub fn args(&self) -> &[Value] {
        self.args
    }

    pub fn has_scope(&self) -> bool {
        self.scope.is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(i) = self.param_names.iter().position(|p| p == name) {
            return self.args.get(i).cloned();
        }
        if let Some((_, v)) = self.captured.iter().find(|(n, _)| n == name) {
            return Some(v.clone());
        }
        self.scope.as_ref().and_then(|s| s.value(name))
    }

    /// Assign into the caller scope, declaring the variable if needed.
    pub fn store(&mut self, name: &str, value: Value) -> Result<()> {
        let scope = self
            .scope
            .as_mut()
            .ok_or_else(|| ScriptError::Scope(format!("no scope to store '{}' into", name)))?;
        if scope.exists(name) {
            scope.set_value(name, value)
        } else {
            scope.new_variable(name, Type::Object, value)
        }
    }
}

// ============================================================================
// Executables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutableKind {
    Script,
    Function,
    Macro,
}

impl fmt::Display for ExecutableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::Function => write!(f, "function"),
            Self::Macro => write!(f, "macro"),
        }
    }
}

/// Output of an engine compile step, before it is typed into a variant.
pub struct Parts {
    pub engine: Arc<dyn Engine>,
    pub code: String,
    pub frozen: FrozenVariableInfos,
    pub captured: Vec<(String, Value)>,
    pub body: Arc<dyn Body>,
}

#[derive(Clone)]
struct Core {
    engine: Arc<dyn Engine>,
    code: Arc<str>,
    frozen: FrozenVariableInfos,
    captured: Vec<(String, Value)>,
    body: OnceCell<Arc<dyn Body>>,
    image: Option<Arc<[u8]>>,
}

impl Core {
    fn from_parts(parts: Parts) -> Self {
        Self {
            engine: parts.engine,
            code: Arc::from(parts.code),
            frozen: parts.frozen,
            captured: parts.captured,
            body: OnceCell::with_value(parts.body),
            image: None,
        }
    }

    fn body(&self) -> Result<&Arc<dyn Body>> {
        self.body.get_or_try_init(|| {
            let image = self.image.as_ref().ok_or_else(|| {
                ScriptError::engine(self.engine.name(), "executable has neither a body nor an image")
            })?;
            self.engine.load_body(image)
        })
    }

    fn image(&self) -> Result<Vec<u8>> {
        match (self.body.get(), &self.image) {
            (Some(body), _) => body.image(),
            (None, Some(image)) => Ok(image.to_vec()),
            (None, None) => Err(ScriptError::Codec("executable has no compiled image".to_string())),
        }
    }

    fn rebound(&self, scope: &dyn Scope) -> Result<Self> {
        self.frozen.ensure_recreatable(scope)?;
        let captured = self
            .frozen
            .names()
            .map(|n| (n.to_string(), scope.value(n).unwrap_or(Value::Null)))
            .collect();
        Ok(Self {
            captured,
            ..self.clone()
        })
    }
}

/// A script: runs against a scope, takes no arguments.
#[derive(Clone)]
pub struct Script {
    core: Core,
}

/// Shared shape of functions and macros.
#[derive(Clone)]
pub struct Routine {
    core: Core,
    signature: Signature,
    param_names: Vec<String>,
}

impl Routine {
    fn new(core: Core, signature: Signature, param_names: Vec<String>) -> Result<Self> {
        if param_names.len() != signature.param_count() {
            return Err(ScriptError::InvalidSignature(format!(
                "{} parameter names for {}",
                param_names.len(),
                signature
            )));
        }
        if param_names.iter().any(|n| n.is_empty()) {
            return Err(ScriptError::InvalidSignature(
                "parameter names must not be empty".to_string(),
            ));
        }
        Ok(Self {
            core,
            signature,
            param_names,
        })
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    fn call(&self, scope: Option<&mut dyn Scope>, args: &[Value]) -> Result<Value> {
        let adjusted = self.signature.adjust_parameters(args)?;
        let body = self.core.body()?;
        let mut frame = Frame::new(&self.param_names, &adjusted, &self.core.captured, scope);
        let result = body.run(&mut frame)?;
        self.signature.ensure_return_compatible(result)
    }
}

/// Script, function, or macro.
#[derive(Clone)]
pub enum Executable {
    Script(Script),
    Function(Routine),
    Macro(Routine),
}

impl Executable {
    pub fn new_script(parts: Parts) -> Self {
        Executable::Script(Script {
            core: Core::from_parts(parts),
        })
    }

    pub fn new_function(parts: Parts, signature: Signature, param_names: Vec<String>) -> Result<Self> {
        Routine::new(Core::from_parts(parts), signature, param_names).map(Executable::Function)
    }

    pub fn new_macro(parts: Parts, signature: Signature, param_names: Vec<String>) -> Result<Self> {
        Routine::new(Core::from_parts(parts), signature, param_names).map(Executable::Macro)
    }

    fn core(&self) -> &Core {
        match self {
            Executable::Script(s) => &s.core,
            Executable::Function(r) | Executable::Macro(r) => &r.core,
        }
    }

    pub fn kind(&self) -> ExecutableKind {
        match self {
            Executable::Script(_) => ExecutableKind::Script,
            Executable::Function(_) => ExecutableKind::Function,
            Executable::Macro(_) => ExecutableKind::Macro,
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.core().engine
    }

    pub fn engine_name(&self) -> &str {
        self.core().engine.name()
    }

    pub fn code(&self) -> &str {
        &self.core().code
    }

    pub fn frozen(&self) -> &FrozenVariableInfos {
        &self.core().frozen
    }

    pub fn captured(&self) -> &[(String, Value)] {
        &self.core().captured
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Executable::Script(_) => None,
            Executable::Function(r) | Executable::Macro(r) => Some(&r.signature),
        }
    }

    pub fn param_names(&self) -> &[String] {
        match self {
            Executable::Script(_) => &[],
            Executable::Function(r) | Executable::Macro(r) => &r.param_names,
        }
    }

    /// Whether the body is attached (false until first use after decoding).
    pub fn has_body(&self) -> bool {
        self.core().body.get().is_some()
    }

    /// New executable bound to `scope`'s values for the frozen names.
    ///
    /// The receiver is left untouched and the compiled body is shared.
    pub fn recreate(&self, scope: &dyn Scope) -> Result<Executable> {
        let recreated = match self {
            Executable::Script(s) => Executable::Script(Script {
                core: s.core.rebound(scope)?,
            }),
            Executable::Function(r) => Executable::Function(Routine {
                core: r.core.rebound(scope)?,
                ..r.clone()
            }),
            Executable::Macro(r) => Executable::Macro(Routine {
                core: r.core.rebound(scope)?,
                ..r.clone()
            }),
        };
        Ok(recreated)
    }

    /// Call a function. Macros and scripts run in a fresh engine scope.
    pub fn run(&self, args: &[Value]) -> Result<Value> {
        match self {
            Executable::Function(r) => r.call(None, args),
            _ => {
                let mut scope = self.engine().new_scope();
                self.run_in(scope.as_mut(), args)
            }
        }
    }

    /// Call with a caller scope. Functions never see it.
    pub fn run_in(&self, scope: &mut dyn Scope, args: &[Value]) -> Result<Value> {
        match self {
            Executable::Function(r) => r.call(None, args),
            Executable::Macro(r) => r.call(Some(scope), args),
            Executable::Script(s) => {
                if !args.is_empty() {
                    return Err(ScriptError::IncompatibleParameter {
                        args: args.iter().map(Value::describe).collect::<Vec<_>>().join(", "),
                        signature: "script".to_string(),
                    });
                }
                let body = s.core.body()?;
                let mut frame = Frame::new(&[], &[], &s.core.captured, Some(scope));
                body.run(&mut frame)
            }
        }
    }

    /// Serializable form; fails for engines whose compiled code cannot be stored.
    pub fn record(&self) -> Result<ExecutableRecord> {
        let core = self.core();
        if !core.engine.is_compiled_code_serializable() {
            return Err(ScriptError::Codec(format!(
                "compiled code of engine '{}' is not serializable",
                core.engine.name()
            )));
        }
        Ok(ExecutableRecord {
            kind: self.kind(),
            code: core.code.to_string(),
            frozen: core.frozen.clone(),
            captured: core.captured.clone(),
            signature: self.signature().cloned(),
            param_names: self.param_names().to_vec(),
            image: core.image()?,
        })
    }

    /// Rebuild from a record without touching the body; it is loaded lazily.
    pub fn from_record(record: ExecutableRecord, engine: Arc<dyn Engine>) -> Result<Executable> {
        let core = Core {
            engine,
            code: Arc::from(record.code),
            frozen: record.frozen,
            captured: record.captured,
            body: OnceCell::new(),
            image: Some(Arc::from(record.image)),
        };
        match (record.kind, record.signature) {
            (ExecutableKind::Script, _) => Ok(Executable::Script(Script { core })),
            (ExecutableKind::Function, Some(sig)) => {
                Routine::new(core, sig, record.param_names).map(Executable::Function)
            }
            (ExecutableKind::Macro, Some(sig)) => {
                Routine::new(core, sig, record.param_names).map(Executable::Macro)
            }
            (kind, None) => Err(ScriptError::Codec(format!("{} record without a signature", kind))),
        }
    }
}

impl PartialEq for Executable {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.core(), other.core());
        self.kind() == other.kind()
            && a.engine.name() == b.engine.name()
            && a.engine.parameter() == b.engine.parameter()
            && a.code == b.code
            && a.frozen == b.frozen
            && a.captured == b.captured
            && self.signature() == other.signature()
            && self.param_names() == other.param_names()
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("kind", &self.kind())
            .field("engine", &self.engine_name())
            .field("signature", &self.signature().map(|s| s.to_string()))
            .field("frozen", self.frozen())
            .field("code_len", &self.code().len())
            .field("has_body", &self.has_body())
            .finish()
    }
}

/// Serialized form of an executable inside a cache payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableRecord {
    pub kind: ExecutableKind,
    pub code: String,
    pub frozen: FrozenVariableInfos,
    pub captured: Vec<(String, Value)>,
    pub signature: Option<Signature>,
    pub param_names: Vec<String>,
    pub image: Vec<u8>,
}
