//! SC-002: Call signatures and the argument/return adapter.
//!
//! A signature is immutable once built. Equality and hashing are structural
//! and ignore the optional name.

use crate::core::error::{Result, ScriptError};
use crate::core::types::{Type, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Declared call contract of a function or macro.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawSignature")]
pub struct Signature {
    name: Option<String>,
    params: Vec<Type>,
    var_args: bool,
    returns: Type,
}

/// Decoded fields, checked through `Signature::new` before use.
#[derive(Deserialize)]
struct RawSignature {
    name: Option<String>,
    params: Vec<Type>,
    var_args: bool,
    returns: Type,
}

impl TryFrom<RawSignature> for Signature {
    type Error = ScriptError;

    fn try_from(raw: RawSignature) -> Result<Self> {
        Self::new(raw.name.as_deref(), raw.params, raw.var_args, raw.returns)
    }
}

impl Signature {
    /// Build a signature. For variable arity the last parameter type is the
    /// element type of the trailing array.
    pub fn new(name: Option<&str>, params: Vec<Type>, var_args: bool, returns: Type) -> Result<Self> {
        if var_args && params.is_empty() {
            return Err(ScriptError::InvalidSignature(
                "a signature without parameters cannot be variable-arity".to_string(),
            ));
        }
        if returns.is_primitive() {
            return Err(ScriptError::InvalidSignature(format!(
                "primitive return type '{}' is not allowed",
                returns
            )));
        }
        if let Some(p) = params.iter().find(|p| p.is_primitive()) {
            return Err(ScriptError::InvalidSignature(format!(
                "primitive parameter type '{}' is not allowed",
                p
            )));
        }
        Ok(Self {
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            params,
            var_args,
            returns,
        })
    }

    /// `(Object ...):Object`, accepts anything.
    pub fn free() -> Self {
        Self {
            name: None,
            params: vec![Type::Object],
            var_args: true,
            returns: Type::Object,
        }
    }

    /// `():Object`
    pub fn procedure() -> Self {
        Self {
            name: None,
            params: Vec::new(),
            var_args: false,
            returns: Type::Object,
        }
    }

    /// `main($Args:String ...):Void`
    pub fn main() -> Self {
        Self {
            name: Some("main".to_string()),
            params: vec![Type::Text],
            var_args: true,
            returns: Type::Void,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn param_type(&self, index: usize) -> Option<&Type> {
        self.params.get(index)
    }

    pub fn is_var_args(&self) -> bool {
        self.var_args
    }

    pub fn return_type(&self) -> &Type {
        &self.returns
    }

    /// Copy with a different name.
    pub fn renamed(&self, name: Option<&str>) -> Self {
        Self {
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            ..self.clone()
        }
    }

    /// Map caller arguments onto the exact shape the body expects.
    ///
    /// The result always has `param_count()` elements; for variable arity the
    /// last one is an array of the element type.
    pub fn adjust_parameters(&self, args: &[Value]) -> Result<Vec<Value>> {
        let count = self.params.len();
        let mut adjusted: Vec<Value>;

        if self.var_args {
            let Some(element) = self.params.last() else {
                return Err(self.incompatible(args));
            };
            match args.len().cmp(&count) {
                Ordering::Less => {
                    if args.len() + 1 < count {
                        return Err(self.incompatible(args));
                    }
                    adjusted = args.to_vec();
                    adjusted.push(Value::empty_array(element.clone()));
                }
                Ordering::Equal => {
                    adjusted = args[..count - 1].to_vec();
                    let trailing = self
                        .adjust_trailing(&args[count - 1], element)
                        .ok_or_else(|| self.incompatible(args))?;
                    adjusted.push(trailing);
                }
                Ordering::Greater => {
                    let excess = &args[count - 1..];
                    if !excess.iter().all(|v| element.accepts(v)) {
                        return Err(self.incompatible(args));
                    }
                    adjusted = args[..count - 1].to_vec();
                    adjusted.push(Value::Array {
                        element: element.clone(),
                        items: excess.to_vec(),
                    });
                }
            }
        } else {
            if args.len() != count {
                return Err(self.incompatible(args));
            }
            adjusted = args.to_vec();
        }

        let fixed = if self.var_args { count - 1 } else { count };
        for (ty, arg) in self.params.iter().zip(adjusted.iter()).take(fixed) {
            if !ty.accepts(arg) {
                return Err(self.incompatible(args));
            }
        }
        Ok(adjusted)
    }

    fn adjust_trailing(&self, last: &Value, element: &Type) -> Option<Value> {
        if last.is_null() {
            return Some(Value::empty_array(element.clone()));
        }
        if element.is_instance(last) {
            return Some(Value::Array {
                element: element.clone(),
                items: vec![last.clone()],
            });
        }
        match last {
            Value::Array {
                element: inner,
                items,
            } => {
                if element.is_assignable_from(inner) {
                    Some(last.clone())
                } else if items.iter().all(|v| element.accepts(v)) {
                    Some(Value::Array {
                        element: element.clone(),
                        items: items.clone(),
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Validate a returned value, converting between numeric wrappers.
    pub fn ensure_return_compatible(&self, value: Value) -> Result<Value> {
        if value.is_null() || self.returns.is_instance(&value) {
            return Ok(value);
        }
        if self.returns.is_numeric_wrapper() {
            if let Some(converted) = value.convert_number(&self.returns) {
                return Ok(converted);
            }
        }
        Err(ScriptError::InvalidReturn {
            value: value.to_string(),
            signature: self.to_string(),
        })
    }

    /// Can a body with this signature stand in where `other` is expected?
    pub fn is_substitutable_for(&self, other: &Signature) -> bool {
        if self == other {
            return true;
        }
        if self.var_args != other.var_args || self.params.len() != other.params.len() {
            return false;
        }
        let returns_ok = other.returns == Type::Void || other.returns.is_assignable_from(&self.returns);
        returns_ok
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(mine, theirs)| mine.is_assignable_from(theirs))
    }

    fn incompatible(&self, args: &[Value]) -> ScriptError {
        let described: Vec<String> = args.iter().map(Value::describe).collect();
        ScriptError::IncompatibleParameter {
            args: described.join(", "),
            signature: self.to_string(),
        }
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.var_args == other.var_args && self.returns == other.returns && self.params == other.params
    }
}

impl Eq for Signature {}

impl Hash for Signature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.params.hash(state);
        self.var_args.hash(state);
        self.returns.hash(state);
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function (")?;
        for (i, p) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
            if self.var_args && i == self.params.len() - 1 {
                write!(f, " ...")?;
            }
        }
        write!(f, "):{}", self.returns)
    }
}

impl std::str::FromStr for Signature {
    type Err = ScriptError;

    /// Parse `(name:Type, ...):Type`; parameter names are dropped.
    fn from_str(s: &str) -> Result<Self> {
        crate::core::header::parse_signature(None, s).map(|(sig, _)| sig)
    }
}
