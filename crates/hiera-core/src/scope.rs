//! Variable scopes used for interpolation
//!
//! A scope is anything that can answer "what is the value of this
//! variable". Lookups never modify a scope.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::value::Value;

/// Read-only variable environment
pub trait Scope {
    /// Get the value of a variable, if defined
    fn get(&self, key: &str) -> Option<Value>;

    /// Check if a variable is defined
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// A scope with no variables
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }
}

impl Scope for IndexMap<String, Value> {
    fn get(&self, key: &str) -> Option<Value> {
        IndexMap::get(self, key).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

impl Scope for HashMap<String, Value> {
    fn get(&self, key: &str) -> Option<Value> {
        HashMap::get(self, key).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

/// Mappings act as scopes; any other value has no variables
impl Scope for Value {
    fn get(&self, key: &str) -> Option<Value> {
        self.as_mapping().and_then(|m| m.get(key)).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.as_mapping().is_some_and(|m| m.contains_key(key))
    }
}

impl<S: Scope + ?Sized> Scope for &S {
    fn get(&self, key: &str) -> Option<Value> {
        (**self).get(key)
    }

    fn contains(&self, key: &str) -> bool {
        (**self).contains(key)
    }
}

/// A scope with one variable replaced
pub struct OverlayScope<'a> {
    inner: &'a dyn Scope,
    name: &'a str,
    value: &'a Value,
}

impl<'a> OverlayScope<'a> {
    pub fn new(inner: &'a dyn Scope, name: &'a str, value: &'a Value) -> Self {
        Self { inner, name, value }
    }
}

impl Scope for OverlayScope<'_> {
    fn get(&self, key: &str) -> Option<Value> {
        if key == self.name {
            Some(self.value.clone())
        } else {
            self.inner.get(key)
        }
    }

    fn contains(&self, key: &str) -> bool {
        key == self.name || self.inner.contains(key)
    }
}

/// Resolve a variable from `scope`, falling back to `extra` when the scope
/// leaves it undefined (absent or null).
pub(crate) fn lookup_variable(scope: &dyn Scope, extra: &dyn Scope, key: &str) -> Option<Value> {
    match scope.get(key) {
        Some(v) if !v.is_null() => Some(v),
        _ => extra.get(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_index_map_scope() {
        let mut scope = IndexMap::new();
        scope.insert("environment".to_string(), Value::from("production"));

        assert_eq!(Scope::get(&scope, "environment"), Some(Value::from("production")));
        assert!(Scope::contains(&scope, "environment"));
        assert!(!Scope::contains(&scope, "missing"));
    }

    #[test]
    fn test_value_scope_only_for_mappings() {
        let scope: Value = serde_yaml::from_str("name: box1").unwrap();
        assert_eq!(scope.get("name"), Some(Value::from("box1")));
        assert_eq!(Value::from("name").get("name"), None);
    }

    #[test]
    fn test_overlay_replaces_one_variable() {
        let inner: Value = serde_yaml::from_str("{role: web, env: dev}").unwrap();
        let role = Value::from("db");
        let overlay = OverlayScope::new(&inner, "role", &role);

        assert_eq!(overlay.get("role"), Some(Value::from("db")));
        assert_eq!(overlay.get("env"), Some(Value::from("dev")));
        assert!(!overlay.contains("missing"));
    }

    #[test]
    fn test_lookup_variable_prefers_scope() {
        let scope: Value = serde_yaml::from_str("a: from_scope").unwrap();
        let extra: Value = serde_yaml::from_str("a: from_extra\nb: only_extra").unwrap();

        assert_eq!(lookup_variable(&scope, &extra, "a"), Some(Value::from("from_scope")));
        assert_eq!(lookup_variable(&scope, &extra, "b"), Some(Value::from("only_extra")));
        assert_eq!(lookup_variable(&scope, &extra, "c"), None);
    }

    #[test]
    fn test_null_in_scope_falls_back_to_extra() {
        let scope: Value = serde_yaml::from_str("a: ~").unwrap();
        let extra: Value = serde_yaml::from_str("a: fallback").unwrap();

        assert_eq!(lookup_variable(&scope, &extra, "a"), Some(Value::from("fallback")));
        assert_eq!(lookup_variable(&scope, &EmptyScope, "a"), None);
    }
}
