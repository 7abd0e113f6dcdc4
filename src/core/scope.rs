//! SC-003: Variable scopes.
//!
//! The `Scope` trait is the boundary compiled bodies and frozen-variable
//! capture talk to. `SimpleScope` is an insertion-ordered default.

use crate::core::error::{Result, ScriptError};
use crate::core::types::{Type, Value};
use indexmap::IndexMap;

/// A named-variable environment.
pub trait Scope {
    fn exists(&self, name: &str) -> bool;

    /// Declared type of a variable, `None` when it is not declared.
    fn type_of(&self, name: &str) -> Option<Type>;

    fn value(&self, name: &str) -> Option<Value>;

    /// Assign an existing, non-constant variable.
    fn set_value(&mut self, name: &str, value: Value) -> Result<()>;

    fn new_variable(&mut self, name: &str, ty: Type, value: Value) -> Result<()>;

    fn new_constant(&mut self, name: &str, ty: Type, value: Value) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    ty: Type,
    value: Value,
    constant: bool,
}

/// Insertion-ordered scope backed by an `IndexMap`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimpleScope {
    slots: IndexMap<String, Slot>,
}

impl SimpleScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of `new_variable`, for literals in tests and the CLI.
    pub fn with_variable(mut self, name: &str, ty: Type, value: Value) -> Result<Self> {
        self.new_variable(name, ty, value)?;
        Ok(self)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(|s| s.constant)
    }

    fn declare(&mut self, name: &str, ty: Type, value: Value, constant: bool) -> Result<()> {
        if name.is_empty() {
            return Err(ScriptError::Scope("variable name must not be empty".to_string()));
        }
        if self.slots.contains_key(name) {
            return Err(ScriptError::Scope(format!("variable '{}' already exists", name)));
        }
        check_type(name, &ty, &value)?;
        self.slots.insert(
            name.to_string(),
            Slot {
                ty,
                value,
                constant,
            },
        );
        Ok(())
    }
}

fn check_type(name: &str, ty: &Type, value: &Value) -> Result<()> {
    if ty.accepts(value) {
        return Ok(());
    }
    Err(ScriptError::Scope(format!(
        "cannot assign {} to '{}' of type {}",
        value.describe(),
        name,
        ty
    )))
}

impl Scope for SimpleScope {
    fn exists(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    fn type_of(&self, name: &str) -> Option<Type> {
        self.slots.get(name).map(|s| s.ty.clone())
    }

    fn value(&self, name: &str) -> Option<Value> {
        self.slots.get(name).map(|s| s.value.clone())
    }

    fn set_value(&mut self, name: &str, value: Value) -> Result<()> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| ScriptError::Scope(format!("variable '{}' does not exist", name)))?;
        if slot.constant {
            return Err(ScriptError::Scope(format!("'{}' is a constant", name)));
        }
        check_type(name, &slot.ty, &value)?;
        slot.value = value;
        Ok(())
    }

    fn new_variable(&mut self, name: &str, ty: Type, value: Value) -> Result<()> {
        self.declare(name, ty, value, false)
    }

    fn new_constant(&mut self, name: &str, ty: Type, value: Value) -> Result<()> {
        self.declare(name, ty, value, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sc003_declare_and_read() {
        let mut scope = SimpleScope::new();
        scope.new_variable("x", Type::Integer, Value::Int(1)).unwrap();
        assert!(scope.exists("x"));
        assert_eq!(scope.type_of("x"), Some(Type::Integer));
        assert_eq!(scope.value("x"), Some(Value::Int(1)));
        assert_eq!(scope.type_of("y"), None);
    }

    #[test]
    fn test_sc003_duplicate_rejected() {
        let mut scope = SimpleScope::new();
        scope.new_variable("x", Type::Integer, Value::Int(1)).unwrap();
        assert!(scope.new_constant("x", Type::Integer, Value::Int(2)).is_err());
    }

    #[test]
    fn test_sc003_constant_is_read_only() {
        let mut scope = SimpleScope::new();
        scope.new_constant("pi", Type::Double, Value::Double(2.5)).unwrap();
        assert!(scope.is_constant("pi"));
        assert!(scope.set_value("pi", Value::Double(3.0)).is_err());
    }

    #[test]
    fn test_sc003_set_value_checks_type() {
        let mut scope = SimpleScope::new()
            .with_variable("n", Type::Number, Value::Null)
            .unwrap();
        scope.set_value("n", Value::Long(5)).unwrap();
        assert!(scope.set_value("n", Value::Text("five".into())).is_err());
        assert!(scope.set_value("missing", Value::Null).is_err());
    }

    #[test]
    fn test_sc003_names_keep_order() {
        let scope = SimpleScope::new()
            .with_variable("b", Type::Object, Value::Null)
            .unwrap()
            .with_variable("a", Type::Object, Value::Null)
            .unwrap();
        assert_eq!(scope.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(scope.len(), 2);
    }
}
