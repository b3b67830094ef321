use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};

use crate::emitter::{Emitter, Event, ListenerId};
use crate::lock::lock;
use crate::token::{split_path, value_at_path};

/// Computes a context value on every read.
pub type Provider = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone)]
pub enum ContextEntry {
    Value(Value),
    Provider(Provider),
}

impl ContextEntry {
    pub fn resolve(&self) -> Value {
        match self {
            ContextEntry::Value(value) => value.clone(),
            ContextEntry::Provider(provider) => provider(),
        }
    }
}

impl Debug for ContextEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextEntry::Value(value) => f.debug_tuple("Value").field(value).finish(),
            ContextEntry::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

#[derive(Default)]
struct ContextInner {
    entries: Mutex<BTreeMap<String, ContextEntry>>,
    emitter: Emitter<Context>,
}

/// Shared top-level data that compiled plans read from and write results
/// into. Every access is announced as `ctx-read` or `ctx-write`
/// with `[key, value]`.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = lock(&self.inner.entries).get(key).cloned();
        let value = entry.map(|entry| entry.resolve());
        self.notify(
            "ctx-read",
            vec![json!(key), value.clone().unwrap_or(Value::Null)],
        );
        value
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        lock(&self.inner.entries).insert(key.clone(), ContextEntry::Value(value.clone()));
        self.notify("ctx-write", vec![Value::String(key), value]);
    }

    /// Stores a provider evaluated on each read of `key`.
    pub fn set_provider(
        &self,
        key: impl Into<String>,
        provider: impl Fn() -> Value + Send + Sync + 'static,
    ) {
        let key = key.into();
        lock(&self.inner.entries).insert(key.clone(), ContextEntry::Provider(Arc::new(provider)));
        self.notify("ctx-write", vec![Value::String(key), Value::Null]);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = lock(&self.inner.entries).remove(key);
        removed.map(|entry| entry.resolve())
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner.entries).contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.inner.entries).keys().cloned().collect()
    }

    /// Resolves a dotted path. The first segment is a context read, the rest
    /// walks into the value found.
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let (head, rest) = split_path(path);
        let value = self.get(head)?;
        match rest {
            Some(rest) => value_at_path(&value, rest),
            None => Some(value),
        }
    }

    /// Current contents with providers evaluated. Emits nothing.
    pub fn snapshot(&self) -> Map<String, Value> {
        let entries: Vec<(String, ContextEntry)> = lock(&self.inner.entries)
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        entries
            .into_iter()
            .map(|(key, entry)| (key, entry.resolve()))
            .collect()
    }

    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Event<Context>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.emitter.on(event, handler)
    }

    pub fn on_any(&self, handler: impl Fn(&Event<Context>) + Send + Sync + 'static) -> ListenerId {
        self.inner.emitter.on_any(handler)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.emitter.off(event, id)
    }

    fn notify(&self, name: &str, args: Vec<Value>) {
        self.inner.emitter.dispatch(&Event {
            name: name.to_string(),
            target: self.clone(),
            args,
        });
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("entries", &*lock(&self.inner.entries))
            .finish_non_exhaustive()
    }
}
