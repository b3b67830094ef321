use std::iter;
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::composite::Composite;
use crate::lock::lock;
use crate::node::Node;
use crate::token::{self, split_path, value_at_path};

/// Key/value data owned by one node.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    values: Mutex<Map<String, Value>>,
}

impl Scope {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: String, value: Value) {
        lock(&self.values).insert(key, value);
    }

    fn remove(&self, key: &str) -> Option<Value> {
        lock(&self.values).remove(key)
    }

    fn snapshot(&self) -> Map<String, Value> {
        lock(&self.values).clone()
    }
}

impl Node {
    /// Reads `key` from this node's scope, falling through to the nearest
    /// ancestor that defines it.
    pub fn scope_get(&self, key: &str) -> Option<Value> {
        iter::once(self.clone())
            .chain(self.parents())
            .find_map(|node| node.inner.scope.get(key))
    }

    /// Writes land on this node only.
    pub fn scope_set(&self, key: impl Into<String>, value: Value) {
        self.inner.scope.set(key.into(), value);
    }

    pub fn scope_remove(&self, key: &str) -> Option<Value> {
        self.inner.scope.remove(key)
    }

    pub fn with_scope_value(self, key: impl Into<String>, value: Value) -> Self {
        self.scope_set(key, value);
        self
    }

    /// Entries stored on this node, without inherited ones.
    pub fn local_scope(&self) -> Map<String, Value> {
        self.inner.scope.snapshot()
    }

    /// Union of this node's scope and all ancestor scopes, nearest wins.
    pub fn effective_scope(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        let chain: Vec<Node> = iter::once(self.clone()).chain(self.parents()).collect();
        for node in chain.iter().rev() {
            merged.extend(node.inner.scope.snapshot());
        }
        merged
    }

    /// Resolves a dotted path: the first segment through the scope chain,
    /// the rest into the value found.
    pub fn scope_path(&self, path: &str) -> Option<Value> {
        let (head, rest) = split_path(path);
        let value = self.scope_get(head)?;
        match rest {
            Some(rest) => value_at_path(&value, rest),
            None => Some(value),
        }
    }

    pub fn global_get(&self, key: &str) -> Option<Value> {
        self.root().inner.scope.get(key)
    }

    pub fn global_set(&self, key: impl Into<String>, value: Value) {
        self.root().inner.scope.set(key.into(), value);
    }

    /// Token substitution for a single value. Only strings are rewritten.
    pub fn substitute(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => token::substitute(text, |path| self.scope_path(path)),
            other => other.clone(),
        }
    }
}
