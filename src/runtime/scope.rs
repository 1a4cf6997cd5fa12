// Chained variable scopes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use super::value::{yaml_key, Value};
use crate::output::errors::{io_context, TachyonError};

pub type Vars = HashMap<String, Value>;

/// A chained name→value environment. `get` walks the chain from the
/// innermost layer outward; `set` writes only at the current level, so a
/// write at level k is never visible to parents of k.
pub trait Scope: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, val: Value);
}

/// A local mapping over an optional parent scope.
pub struct NestedScope {
    parent: Option<Arc<dyn Scope>>,
    vars: RwLock<Vars>,
}

impl NestedScope {
    pub fn new(parent: Option<Arc<dyn Scope>>) -> Self {
        NestedScope {
            parent,
            vars: RwLock::new(Vars::new()),
        }
    }

    pub fn root() -> Self {
        NestedScope::new(None)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.read().is_empty()
    }

    /// The parent when the local layer is empty, otherwise the scope itself.
    /// Callers cannot distinguish the two by behavior.
    pub fn flatten(self: Arc<Self>) -> Arc<dyn Scope> {
        if self.is_empty() {
            if let Some(parent) = &self.parent {
                return parent.clone();
            }
        }
        self
    }

    /// Deep-import a yaml mapping, or a sequence of mappings (the multi-doc
    /// var form), into the local layer.
    pub fn add_vars(&self, vars: &serde_yaml::Value) {
        match vars {
            serde_yaml::Value::Mapping(m) => {
                for (k, v) in m {
                    self.set(&yaml_key(k), Value::from(v));
                }
            }
            serde_yaml::Value::Sequence(seq) => {
                for item in seq {
                    self.add_vars(item);
                }
            }
            _ => {}
        }
    }

    pub fn local_vars(&self) -> Vars {
        self.vars.read().clone()
    }
}

impl Scope for NestedScope {
    fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.vars.read().get(key) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(key))
    }

    fn set(&self, key: &str, val: Value) {
        self.vars.write().insert(key.to_string(), val);
    }
}

/// A new nested scope whose parent is `cur` and whose local contents are
/// `overrides`' local layer. Used when an include supplies extra vars to the
/// plays it pulls in, without touching the includer's scope.
pub fn splice_overrides(cur: Arc<dyn Scope>, overrides: &NestedScope) -> NestedScope {
    let ns = NestedScope::new(Some(cur));
    for (k, v) in overrides.local_vars() {
        ns.set(&k, v);
    }
    ns
}

/// Two-layer overlay consulted per task: include-vars first, then the
/// backing scope. Writes go to the backing scope.
pub struct PriorityScope {
    task: Vars,
    rest: Arc<dyn Scope>,
}

impl PriorityScope {
    pub fn new(task: Vars, rest: Arc<dyn Scope>) -> Self {
        PriorityScope { task, rest }
    }
}

impl Scope for PriorityScope {
    fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.task.get(key) {
            return Some(v.clone());
        }
        self.rest.get(key)
    }

    fn set(&self, key: &str, val: Value) {
        self.rest.set(key, val);
    }
}

/// Import every entry of a yaml vars file into `scope`. The file must parse
/// as a mapping (or a sequence of mappings).
pub fn import_vars_file(scope: &dyn Scope, path: &Path) -> Result<(), TachyonError> {
    let data = std::fs::read_to_string(path).map_err(|e| io_context(e, path))?;
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(&data).map_err(|e| TachyonError::Parse(e.to_string()))?;

    match &parsed {
        serde_yaml::Value::Mapping(m) => {
            for (k, v) in m {
                scope.set(&yaml_key(k), Value::from(v));
            }
            Ok(())
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                if let serde_yaml::Value::Mapping(m) = item {
                    for (k, v) in m {
                        scope.set(&yaml_key(k), Value::from(v));
                    }
                }
            }
            Ok(())
        }
        serde_yaml::Value::Null => Ok(()),
        _ => Err(TachyonError::Parse(format!(
            "vars file {} is not a mapping",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_walks_outward_first_hit_wins() {
        let outer = Arc::new(NestedScope::root());
        outer.set("a", Value::Int(1));
        outer.set("b", Value::Int(2));

        let inner = NestedScope::new(Some(outer.clone() as Arc<dyn Scope>));
        inner.set("a", Value::Int(10));

        assert_eq!(inner.get("a"), Some(Value::Int(10)));
        assert_eq!(inner.get("b"), Some(Value::Int(2)));
        assert_eq!(inner.get("c"), None);
    }

    #[test]
    fn inner_writes_never_reach_the_parent() {
        let outer = Arc::new(NestedScope::root());
        outer.set("port", Value::Int(80));

        let inner = NestedScope::new(Some(outer.clone() as Arc<dyn Scope>));
        inner.set("port", Value::Int(8080));
        inner.set("fresh", Value::Bool(true));

        assert_eq!(outer.get("port"), Some(Value::Int(80)));
        assert_eq!(outer.get("fresh"), None);
    }

    #[test]
    fn flatten_returns_parent_when_local_is_empty() {
        let outer = Arc::new(NestedScope::root());
        outer.set("x", Value::Int(1));

        let inner = Arc::new(NestedScope::new(Some(outer.clone() as Arc<dyn Scope>)));
        let flat = inner.flatten();
        assert_eq!(flat.get("x"), Some(Value::Int(1)));

        let inner = Arc::new(NestedScope::new(Some(outer as Arc<dyn Scope>)));
        inner.set("y", Value::Int(2));
        let flat = inner.clone().flatten();
        assert_eq!(flat.get("y"), Some(Value::Int(2)));
    }

    #[test]
    fn splice_overrides_shadows_without_mutation() {
        let play = Arc::new(NestedScope::root());
        play.set("role", Value::Str("db".into()));
        play.set("port", Value::Int(80));

        let overrides = NestedScope::root();
        overrides.set("role", Value::Str("web".into()));

        let spliced = splice_overrides(play.clone() as Arc<dyn Scope>, &overrides);
        assert_eq!(spliced.get("role"), Some(Value::Str("web".into())));
        assert_eq!(spliced.get("port"), Some(Value::Int(80)));
        assert_eq!(play.get("role"), Some(Value::Str("db".into())));
    }

    #[test]
    fn priority_scope_prefers_task_vars_and_writes_through() {
        let rest = Arc::new(NestedScope::root());
        rest.set("a", Value::Int(1));

        let mut task = Vars::new();
        task.insert("a".to_string(), Value::Int(99));

        let ps = PriorityScope::new(task, rest.clone() as Arc<dyn Scope>);
        assert_eq!(ps.get("a"), Some(Value::Int(99)));

        ps.set("b", Value::Int(2));
        assert_eq!(rest.get("b"), Some(Value::Int(2)));
    }

    #[test]
    fn add_vars_accepts_mapping_and_sequence_forms() {
        let ns = NestedScope::root();
        let doc: serde_yaml::Value =
            serde_yaml::from_str("- {a: 1}\n- {b: two}").unwrap();
        ns.add_vars(&doc);
        assert_eq!(ns.get("a"), Some(Value::Int(1)));
        assert_eq!(ns.get("b"), Some(Value::Str("two".into())));
    }
}
