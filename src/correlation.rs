//! Correlation id propagation through a synchronous causal chain.
//!
//! A correlation id is assigned to a top-level stimulus (an explicit
//! `emit`, a `set_fact`, or a timer fire) and inherited by every stimulus
//! and audit/trace record produced in its cascade, unless a nested emit
//! explicitly starts a new chain via `emit_correlated`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier propagated through a cascade for traceability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Starts a new causal chain.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-dispatch context threaded through condition evaluation, action
/// execution, and reference resolution for a single stimulus.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    /// The correlation id this stimulus belongs to.
    pub correlation_id: Option<CorrelationId>,
    /// Arbitrary per-dispatch key/value context, readable via `context.<key>`.
    pub values: std::collections::BTreeMap<String, crate::value::Value>,
}

impl DispatchContext {
    #[must_use]
    pub fn new(correlation_id: Option<CorrelationId>) -> Self {
        Self {
            correlation_id,
            values: std::collections::BTreeMap::new(),
        }
    }

    /// Returns the correlation id, assigning a fresh one if this is the
    /// start of a new chain.
    pub fn correlation_id_or_new(&mut self) -> CorrelationId {
        *self.correlation_id.get_or_insert_with(CorrelationId::new)
    }
}
