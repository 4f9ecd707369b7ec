//! The `StorageAdapter` interface the engine persists through, plus an
//! in-memory implementation used by tests and embedders with no durable
//! backend wired up yet.
//!
//! The engine only ever consumes this interface — the actual backend
//! (disk, object store, a database) is out of scope here.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a `StorageAdapter` implementation may raise.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage key not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Metadata stamped onto every persisted record:
/// `{persistedAt, serverId, schemaVersion}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistMetadata {
    pub persisted_at: DateTime<Utc>,
    pub server_id: String,
    pub schema_version: u32,
}

/// A value saved under one storage key: opaque JSON `state` plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub state: serde_json::Value,
    pub metadata: PersistMetadata,
}

/// Object-safe persistence contract consumed by `AuditLog` (bucketed audit
/// entries) and `PersistenceShim` (the rule-set snapshot). Keys used by the
/// engine: `rules` (or a configured override) and `audit-log:YYYY-MM-DDTHH`.
pub trait StorageAdapter: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the underlying write fails.
    fn save(&self, key: &str, record: PersistedRecord) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the underlying read fails.
    fn load(&self, key: &str) -> Result<Option<PersistedRecord>, StorageError>;

    /// Returns `true` iff `key` was present.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the underlying delete fails.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the underlying lookup fails.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Lists every key beginning with `prefix`, in unspecified order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Backend` if the underlying listing fails.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// An in-memory `StorageAdapter` backed by an `RwLock<HashMap>`. Useful for
/// tests and for embedders that accept the audit log and rule snapshot not
/// surviving a process restart.
#[derive(Default)]
pub struct InMemoryStorageAdapter {
    records: RwLock<HashMap<String, PersistedRecord>>,
}

impl InMemoryStorageAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn lock_err<T>(_: std::sync::PoisonError<T>) -> StorageError {
        StorageError::Backend("storage lock poisoned".to_string())
    }
}

impl StorageAdapter for InMemoryStorageAdapter {
    fn save(&self, key: &str, record: PersistedRecord) -> Result<(), StorageError> {
        let mut guard = self.records.write().map_err(Self::lock_err)?;
        guard.insert(key.to_string(), record);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<PersistedRecord>, StorageError> {
        let guard = self.records.read().map_err(Self::lock_err)?;
        Ok(guard.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut guard = self.records.write().map_err(Self::lock_err)?;
        Ok(guard.remove(key).is_some())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let guard = self.records.read().map_err(Self::lock_err)?;
        Ok(guard.contains_key(key))
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let guard = self.records.read().map_err(Self::lock_err)?;
        Ok(guard.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait stays object-safe, per the
    // teacher's `storage/traits.rs` convention.
    fn _assert_object_safe(_: &dyn StorageAdapter) {}

    fn record(v: serde_json::Value) -> PersistedRecord {
        PersistedRecord {
            state: v,
            metadata: PersistMetadata {
                persisted_at: Utc::now(),
                server_id: "test".to_string(),
                schema_version: 1,
            },
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let store = InMemoryStorageAdapter::new();
        store.save("k1", record(serde_json::json!({"a": 1}))).unwrap();
        let loaded = store.load("k1").unwrap().unwrap();
        assert_eq!(loaded.state, serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_load_missing_is_none() {
        let store = InMemoryStorageAdapter::new();
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_reports_presence() {
        let store = InMemoryStorageAdapter::new();
        store.save("k1", record(serde_json::json!(null))).unwrap();
        assert!(store.delete("k1").unwrap());
        assert!(!store.delete("k1").unwrap());
    }

    #[test]
    fn test_exists() {
        let store = InMemoryStorageAdapter::new();
        assert!(!store.exists("k1").unwrap());
        store.save("k1", record(serde_json::json!(null))).unwrap();
        assert!(store.exists("k1").unwrap());
    }

    #[test]
    fn test_list_keys_by_prefix() {
        let store = InMemoryStorageAdapter::new();
        store.save("audit-log:2024-06-15T10", record(serde_json::json!([]))).unwrap();
        store.save("audit-log:2024-06-15T11", record(serde_json::json!([]))).unwrap();
        store.save("rules", record(serde_json::json!([]))).unwrap();

        let mut keys = store.list_keys("audit-log:").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["audit-log:2024-06-15T10", "audit-log:2024-06-15T11"]);
    }
}
