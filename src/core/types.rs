//! SC-001: Value types shared by signatures, scopes, and compiled bodies.
//!
//! `Type` is a small reference-type lattice rooted at `Object`. Primitive
//! type names parse, but exist only so that signatures can reject them.

use crate::core::error::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Types
// ============================================================================

/// Primitive (unboxed) type names. Never valid in a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Void,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Byte => write!(f, "byte"),
            Self::Short => write!(f, "short"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Char => write!(f, "char"),
            Self::Void => write!(f, "void"),
        }
    }
}

/// A declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// The universal type; every non-primitive type is assignable to it.
    Object,
    /// Only `null` is an instance.
    Void,
    Boolean,
    /// Supertype of all the numeric wrappers.
    Number,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    Text,
    Array(Box<Type>),
    Primitive(Primitive),
}

impl Type {
    /// Array of the given element type.
    pub fn array_of(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Parse a type name such as `Integer`, `String[]`, or `java.lang.Long`.
    pub fn parse(name: &str) -> Result<Type> {
        let name = name.trim();
        if let Some(inner) = name.strip_suffix("[]") {
            return Ok(Type::array_of(Type::parse(inner)?));
        }
        let simple = name.strip_prefix("java.lang.").unwrap_or(name);
        let ty = match simple {
            "Object" | "Any" => Type::Object,
            "Void" => Type::Void,
            "Boolean" => Type::Boolean,
            "Number" => Type::Number,
            "Byte" => Type::Byte,
            "Short" => Type::Short,
            "Integer" => Type::Integer,
            "Long" => Type::Long,
            "Float" => Type::Float,
            "Double" => Type::Double,
            "String" => Type::Text,
            "boolean" => Type::Primitive(Primitive::Boolean),
            "byte" => Type::Primitive(Primitive::Byte),
            "short" => Type::Primitive(Primitive::Short),
            "int" => Type::Primitive(Primitive::Int),
            "long" => Type::Primitive(Primitive::Long),
            "float" => Type::Primitive(Primitive::Float),
            "double" => Type::Primitive(Primitive::Double),
            "char" => Type::Primitive(Primitive::Char),
            "void" => Type::Primitive(Primitive::Void),
            _ => return Err(ScriptError::UnknownType(name.to_string())),
        };
        Ok(ty)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Primitive(_))
    }

    /// Byte, Short, Integer, Long, Float, or Double.
    pub fn is_numeric_wrapper(&self) -> bool {
        matches!(
            self,
            Type::Byte | Type::Short | Type::Integer | Type::Long | Type::Float | Type::Double
        )
    }

    /// Element type when this is an array.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// Can a value of type `other` be stored where `self` is declared?
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (_, Type::Primitive(_)) | (Type::Primitive(_), _) => false,
            (Type::Object, _) => true,
            (Type::Number, other) => other.is_numeric_wrapper(),
            (Type::Array(mine), Type::Array(theirs)) => mine.is_assignable_from(theirs),
            _ => false,
        }
    }

    /// Is `value` a non-null instance of this type?
    pub fn is_instance(&self, value: &Value) -> bool {
        match value.type_of() {
            Some(actual) => self.is_assignable_from(&actual),
            None => false,
        }
    }

    /// Null or an instance.
    pub fn accepts(&self, value: &Value) -> bool {
        value.is_null() || self.is_instance(value)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => write!(f, "Object"),
            Self::Void => write!(f, "Void"),
            Self::Boolean => write!(f, "Boolean"),
            Self::Number => write!(f, "Number"),
            Self::Byte => write!(f, "Byte"),
            Self::Short => write!(f, "Short"),
            Self::Integer => write!(f, "Integer"),
            Self::Long => write!(f, "Long"),
            Self::Float => write!(f, "Float"),
            Self::Double => write!(f, "Double"),
            Self::Text => write!(f, "String"),
            Self::Array(inner) => write!(f, "{}[]", inner),
            Self::Primitive(p) => write!(f, "{}", p),
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// A dynamic value flowing through calls and scopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Array { element: Type, items: Vec<Value> },
}

impl Value {
    /// Empty array of the given element type.
    pub fn empty_array(element: Type) -> Value {
        Value::Array {
            element,
            items: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Runtime type; `None` for null.
    pub fn type_of(&self) -> Option<Type> {
        let ty = match self {
            Value::Null => return None,
            Value::Bool(_) => Type::Boolean,
            Value::Byte(_) => Type::Byte,
            Value::Short(_) => Type::Short,
            Value::Int(_) => Type::Integer,
            Value::Long(_) => Type::Long,
            Value::Float(_) => Type::Float,
            Value::Double(_) => Type::Double,
            Value::Text(_) => Type::Text,
            Value::Array { element, .. } => Type::array_of(element.clone()),
        };
        Some(ty)
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric().is_some()
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Value::Byte(v) => Some(Numeric::Int(i64::from(*v))),
            Value::Short(v) => Some(Numeric::Int(i64::from(*v))),
            Value::Int(v) => Some(Numeric::Int(i64::from(*v))),
            Value::Long(v) => Some(Numeric::Int(*v)),
            Value::Float(v) => Some(Numeric::Real(f64::from(*v))),
            Value::Double(v) => Some(Numeric::Real(*v)),
            _ => None,
        }
    }

    /// Integral view of a numeric value (reals truncate).
    pub fn as_i64(&self) -> Option<i64> {
        match self.numeric()? {
            Numeric::Int(v) => Some(v),
            Numeric::Real(v) => Some(v as i64),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.numeric()? {
            Numeric::Int(v) => Some(v as f64),
            Numeric::Real(v) => Some(v),
        }
    }

    /// True when this value is a Float or Double.
    pub fn is_real(&self) -> bool {
        matches!(self.numeric(), Some(Numeric::Real(_)))
    }

    /// Narrow or widen a numeric value to a numeric wrapper type.
    ///
    /// Integral narrowing wraps and real-to-integral conversion saturates
    /// through `int` first for Byte and Short.
    pub fn convert_number(&self, target: &Type) -> Option<Value> {
        let n = self.numeric()?;
        let converted = match (target, n) {
            (Type::Integer, Numeric::Int(v)) => Value::Int(v as i32),
            (Type::Integer, Numeric::Real(v)) => Value::Int(v as i32),
            (Type::Long, Numeric::Int(v)) => Value::Long(v),
            (Type::Long, Numeric::Real(v)) => Value::Long(v as i64),
            (Type::Short, Numeric::Int(v)) => Value::Short(v as i16),
            (Type::Short, Numeric::Real(v)) => Value::Short((v as i32) as i16),
            (Type::Byte, Numeric::Int(v)) => Value::Byte(v as i8),
            (Type::Byte, Numeric::Real(v)) => Value::Byte((v as i32) as i8),
            (Type::Double, Numeric::Int(v)) => Value::Double(v as f64),
            (Type::Double, Numeric::Real(v)) => Value::Double(v),
            (Type::Float, Numeric::Int(v)) => Value::Float(v as f32),
            (Type::Float, Numeric::Real(v)) => Value::Float(v as f32),
            _ => return None,
        };
        Some(converted)
    }

    /// Parse command-line text into a value of the declared type.
    pub fn from_text(text: &str, ty: &Type) -> Result<Value> {
        let bad = || ScriptError::Scope(format!("cannot read '{}' as {}", text, ty));
        let value = match ty {
            Type::Object | Type::Text => Value::Text(text.to_string()),
            Type::Boolean => Value::Bool(text.parse().map_err(|_| bad())?),
            Type::Byte => Value::Byte(text.parse().map_err(|_| bad())?),
            Type::Short => Value::Short(text.parse().map_err(|_| bad())?),
            Type::Integer => Value::Int(text.parse().map_err(|_| bad())?),
            Type::Long => Value::Long(text.parse().map_err(|_| bad())?),
            Type::Float => Value::Float(text.parse().map_err(|_| bad())?),
            Type::Double => Value::Double(text.parse().map_err(|_| bad())?),
            Type::Number => {
                if let Ok(v) = text.parse::<i32>() {
                    Value::Int(v)
                } else if let Ok(v) = text.parse::<i64>() {
                    Value::Long(v)
                } else {
                    Value::Double(text.parse().map_err(|_| bad())?)
                }
            }
            _ => return Err(bad()),
        };
        Ok(value)
    }

    /// `value:Type` form used in incompatible-parameter messages.
    pub fn describe(&self) -> String {
        let ty = self
            .type_of()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "Object".to_string());
        match self {
            Value::Text(s) => format!("\"{}\":{}", escape(s), ty),
            other => format!("{}:{}", other, ty),
        }
    }
}

#[derive(Clone, Copy)]
enum Numeric {
    Int(i64),
    Real(f64),
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{c}' => out.push_str("\\f"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Array { items, .. } => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
