//! SC-004: Frozen-variable (closure capture) sets.
//!
//! A set records, for each captured name, the type the compile-time scope
//! declared. Re-specializing against another scope is legal only when every
//! captured name is still assignable to its recorded type.

use crate::core::error::{Result, ScriptError};
use crate::core::scope::Scope;
use crate::core::types::Type;
use indexmap::IndexSet;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

static EMPTY: Lazy<FrozenVariableInfos> = Lazy::new(|| FrozenVariableInfos {
    entries: Arc::from(Vec::new()),
});

/// Ordered (name, type) pairs captured at compile time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(String, Type)>", into = "Vec<(String, Type)>")]
pub struct FrozenVariableInfos {
    entries: Arc<[(String, Type)]>,
}

impl FrozenVariableInfos {
    /// The shared empty set.
    pub fn empty() -> Self {
        EMPTY.clone()
    }

    /// Resolve each name against `scope` and freeze the result.
    ///
    /// Names the scope does not type are recorded as `Object`. Duplicates
    /// keep their first position.
    pub fn new<I, S>(names: I, scope: Option<&dyn Scope>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(scope) = scope else {
            return Self::empty();
        };
        let unique: IndexSet<String> = names
            .into_iter()
            .map(|n| n.as_ref().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let pairs: Vec<(String, Type)> = unique
            .into_iter()
            .map(|name| {
                let ty = scope.type_of(&name).unwrap_or(Type::Object);
                (name, ty)
            })
            .collect();
        Self::from(pairs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True for the process-wide empty singleton.
    pub fn is_shared_empty(&self) -> bool {
        Arc::ptr_eq(&self.entries, &EMPTY.entries)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Type)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn type_of(&self, name: &str) -> Option<&Type> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Fail with an incompatibility error if `scope` redeclares a captured
    /// name with a type that is not assignable to the recorded one.
    pub fn ensure_recreatable(&self, scope: &dyn Scope) -> Result<()> {
        for (name, required) in self.entries.iter() {
            let Some(found) = scope.type_of(name) else {
                continue;
            };
            if !required.is_assignable_from(&found) {
                return Err(ScriptError::IncompatibleCapture {
                    name: name.clone(),
                    required: required.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Non-failing form of `ensure_recreatable`.
    pub fn can_recreate(&self, scope: &dyn Scope) -> bool {
        self.ensure_recreatable(scope).is_ok()
    }
}

impl Default for FrozenVariableInfos {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<(String, Type)>> for FrozenVariableInfos {
    fn from(pairs: Vec<(String, Type)>) -> Self {
        if pairs.is_empty() {
            return Self::empty();
        }
        Self {
            entries: Arc::from(pairs),
        }
    }
}

impl From<FrozenVariableInfos> for Vec<(String, Type)> {
    fn from(infos: FrozenVariableInfos) -> Self {
        infos.entries.to_vec()
    }
}

impl fmt::Debug for FrozenVariableInfos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(n, t)| (n, t)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scope::SimpleScope;
    use crate::core::types::Value;

    fn scope_with(name: &str, ty: Type, value: Value) -> SimpleScope {
        SimpleScope::new().with_variable(name, ty, value).unwrap()
    }

    #[test]
    fn test_sc004_resolves_types_from_scope() {
        let scope = scope_with("x", Type::Integer, Value::Int(1));
        let fv = FrozenVariableInfos::new(["x", "y"], Some(&scope));
        assert_eq!(fv.len(), 2);
        assert_eq!(fv.type_of("x"), Some(&Type::Integer));
        assert_eq!(fv.type_of("y"), Some(&Type::Object));
    }

    #[test]
    fn test_sc004_empty_is_shared() {
        let scope = SimpleScope::new();
        let none: [&str; 0] = [];
        assert!(FrozenVariableInfos::new(none, Some(&scope)).is_shared_empty());
        assert!(FrozenVariableInfos::new(["x"], None).is_shared_empty());
        assert!(FrozenVariableInfos::default().is_shared_empty());
    }

    #[test]
    fn test_sc004_duplicates_collapse() {
        let scope = SimpleScope::new();
        let fv = FrozenVariableInfos::new(["a", "b", "a"], Some(&scope));
        assert_eq!(fv.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_sc004_incompatible_recreate() {
        let old = scope_with("x", Type::Integer, Value::Int(1));
        let fv = FrozenVariableInfos::new(["x"], Some(&old));
        let new = scope_with("x", Type::Text, Value::Text("s".into()));
        let err = fv.ensure_recreatable(&new).unwrap_err();
        match err {
            ScriptError::IncompatibleCapture {
                name,
                required,
                found,
            } => {
                assert_eq!(name, "x");
                assert_eq!(required, "Integer");
                assert_eq!(found, "String");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fv.can_recreate(&new));
    }

    #[test]
    fn test_sc004_narrower_type_is_compatible() {
        let old = scope_with("n", Type::Number, Value::Null);
        let fv = FrozenVariableInfos::new(["n"], Some(&old));
        let new = scope_with("n", Type::Long, Value::Long(3));
        assert!(fv.can_recreate(&new));
        assert!(fv.can_recreate(&SimpleScope::new()));
    }

    #[test]
    fn test_sc004_serde_roundtrip_keeps_order() {
        let fv = FrozenVariableInfos::from(vec![
            ("b".to_string(), Type::Long),
            ("a".to_string(), Type::Text),
        ]);
        let json = serde_json::to_string(&fv).unwrap();
        let back: FrozenVariableInfos = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fv);
        let empty: FrozenVariableInfos = serde_json::from_str("[]").unwrap();
        assert!(empty.is_shared_empty());
    }
}
