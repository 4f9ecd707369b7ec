//! Keyed fact-key → value map with glob-pattern matching and change
//! notifications.
//!
//! Keys are colon-delimited (`order:ord-1:status`); patterns use `*` per
//! segment via the shared [`crate::glob`] matcher.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::glob::segment_glob_match;
use crate::value::Value;

/// The kind of change notification a `FactStore` mutation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A change notification fired by `FactStore::set`/`delete`.
#[derive(Debug, Clone)]
pub struct FactChange {
    pub kind: FactChangeKind,
    pub key: String,
    pub value: Option<Value>,
}

/// Thread-safe keyed fact store.
///
/// A `set` to the same value still fires `fact_updated` — callers
/// that want dedup semantics must check `get` themselves first. Change
/// notifications fire before the caller (the dispatcher) observes the
/// change, so conditions reading the same key within the same dispatch
/// transaction see the new value.
#[derive(Default)]
pub struct FactStore {
    facts: RwLock<HashMap<String, Value>>,
}

impl FactStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            facts: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.facts.read().ok()?.get(key).cloned()
    }

    /// Sets `key` to `value`, returning the change notification describing
    /// whether this was a creation or an update. A `set` to the identical
    /// value still reports `Updated` if the key already existed (per the
    /// design note resolving this as a binding behavior, not an open
    /// question left to guess).
    pub fn set(&self, key: impl Into<String>, value: Value) -> FactChange {
        let key = key.into();
        let mut guard = self.facts.write().expect("fact store lock poisoned");
        let kind = if guard.contains_key(&key) {
            FactChangeKind::Updated
        } else {
            FactChangeKind::Created
        };
        guard.insert(key.clone(), value.clone());
        FactChange {
            kind,
            key,
            value: Some(value),
        }
    }

    /// Deletes `key`, returning `Some` iff the key was present —
    /// `fact_deleted` only fires when the key existed.
    pub fn delete(&self, key: &str) -> Option<FactChange> {
        let mut guard = self.facts.write().expect("fact store lock poisoned");
        guard.remove(key).map(|_| FactChange {
            kind: FactChangeKind::Deleted,
            key: key.to_string(),
            value: None,
        })
    }

    /// Returns all `(key, value)` pairs whose key matches `pattern`.
    #[must_use]
    pub fn matching(&self, pattern: &str) -> Vec<(String, Value)> {
        let guard = self.facts.read().expect("fact store lock poisoned");
        guard
            .iter()
            .filter(|(key, _)| segment_glob_match(pattern, key, ':'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.read().expect("fact store lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
