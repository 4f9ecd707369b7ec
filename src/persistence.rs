//! PersistenceShim: snapshots the rule set through a `StorageAdapter` (spec
//! §2/§6 — "rules (or configured override) for the rule snapshot").
//!
//! The engine core treats persistence purely as this one save/load seam; it
//! never assumes anything about the backend behind `StorageAdapter`.

use std::sync::Arc;

use chrono::Utc;

use crate::audit::storage::{PersistMetadata, PersistedRecord, StorageAdapter, StorageError};
use crate::rule::Rule;

/// Tunables for `PersistenceShim`.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Storage key the rule snapshot is saved under.
    pub rules_key: String,
    pub server_id: String,
    pub schema_version: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            rules_key: "rules".to_string(),
            server_id: "reflexive".to_string(),
            schema_version: 1,
        }
    }
}

/// Saves and restores the full rule set as a single snapshot record.
pub struct PersistenceShim {
    config: PersistenceConfig,
    storage: Arc<dyn StorageAdapter>,
}

impl PersistenceShim {
    #[must_use]
    pub fn new(config: PersistenceConfig, storage: Arc<dyn StorageAdapter>) -> Self {
        Self { config, storage }
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the adapter fails or the rule set can't be
    /// serialized.
    pub fn save_snapshot(&self, rules: &[Rule]) -> Result<(), StorageError> {
        let state = serde_json::to_value(rules).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let record = PersistedRecord {
            state,
            metadata: PersistMetadata {
                persisted_at: Utc::now(),
                server_id: self.config.server_id.clone(),
                schema_version: self.config.schema_version,
            },
        };
        self.storage.save(&self.config.rules_key, record)
    }

    /// Returns an empty vec if no snapshot has ever been saved.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the adapter fails or the stored state can't
    /// be deserialized into `Rule`s.
    pub fn load_snapshot(&self) -> Result<Vec<Rule>, StorageError> {
        match self.storage.load(&self.config.rules_key)? {
            Some(record) => serde_json::from_value(record.state).map_err(|e| StorageError::Serialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }
}
