//! Error types for the rule engine.
//!
//! All errors are strongly typed with `thiserror`, layered the way the
//! engine's error-handling design separates ingest-time validation from
//! runtime dispatch failures.

use thiserror::Error;

/// Structural or semantic issue found while normalizing a `RuleInput`.
///
/// Ingest-time issues are collected rather than raised one at a time, so
/// callers see every problem with a rule definition in one pass.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{path}: {message}")]
pub struct ValidationError {
    /// Dotted path into the `RuleInput` the issue was found at (e.g. `trigger.pattern`).
    pub path: String,
    /// Human-readable description.
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors that occur while a single stimulus is being dispatched.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Registration of a rule whose id already exists.
    #[error("rule id '{0}' is already registered")]
    DuplicateRuleId(String),

    /// An interpolation or `ref` path resolved to nothing where a concrete
    /// value was required (e.g. a `set_fact` key).
    #[error("reference resolution failed for path '{path}'")]
    ReferenceResolutionError {
        /// The unresolved path.
        path: String,
    },

    /// A condition raised an evaluation exception (bad regex, type
    /// mismatch). Per the engine's contract this never propagates — it is
    /// folded into `false` and traced — but the error value itself is kept
    /// around for the trace entry.
    #[error("condition evaluation error: {0}")]
    ConditionEvaluationError(String),

    /// A single action failed. Sibling actions still run; the rule is still
    /// `rule_executed`.
    #[error("action '{action}' failed: {reason}")]
    ActionFailure {
        /// The action variant name.
        action: String,
        /// Failure reason.
        reason: String,
    },

    /// An unexpected error outside the action executor (registry
    /// corruption, an internal invariant violated). Unlike `ActionFailure`,
    /// this marks the rule `rule_failed`.
    #[error("rule '{rule_id}' failed: {reason}")]
    RuleFailed {
        /// The rule that failed.
        rule_id: String,
        /// Failure reason.
        reason: String,
    },

    /// Underlying `StorageAdapter` failure. Logged and surfaced to the
    /// caller of the explicit operation that triggered it; never stops the
    /// engine.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The cascade produced by a single top-level stimulus exceeded the
    /// configured depth cutoff. Logged and the remaining queue is dropped.
    #[error("cascade depth {depth} exceeded limit {limit}")]
    CascadeDepthExceeded {
        /// Depth reached.
        depth: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The dispatcher worker thread is gone.
    #[error("dispatcher worker disconnected")]
    Disconnected,
}

/// Top-level error type for the engine's public entrypoints.
///
/// Per the propagation policy, only errors from `register_rule`, `emit`,
/// `set_fact`, `flush`, and `stop` surface here; subscriber/sink/action
/// errors are contained at their own layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// One or more `RuleInput` validation issues.
    #[error("rule input invalid: {0:?}")]
    Validation(Vec<ValidationError>),

    /// A dispatch-time failure.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// An invalid duration string/value.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

impl EngineError {
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_duplicate_rule_id(&self) -> bool {
        matches!(self, Self::Dispatch(DispatchError::DuplicateRuleId(_)))
    }

    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Dispatch(DispatchError::PersistenceError(_)))
    }

    /// Persistence and disconnect errors are worth a caller retry; validation
    /// and cascade-depth errors are not (they won't change on retry).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Dispatch(DispatchError::PersistenceError(_) | DispatchError::Disconnected)
        )
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("trigger.pattern", "missing pattern");
        let msg = format!("{err}");
        assert!(msg.contains("trigger.pattern"));
        assert!(msg.contains("missing pattern"));
    }

    #[test]
    fn test_dispatch_error_duplicate_rule_id() {
        let err = DispatchError::DuplicateRuleId("r1".to_string());
        assert!(format!("{err}").contains("r1"));
    }

    #[test]
    fn test_dispatch_error_cascade_depth_exceeded() {
        let err = DispatchError::CascadeDepthExceeded { depth: 65, limit: 64 };
        let msg = format!("{err}");
        assert!(msg.contains("65"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_engine_error_from_dispatch() {
        let dispatch_err = DispatchError::Disconnected;
        let engine_err: EngineError = dispatch_err.into();
        assert!(engine_err.is_retryable());
    }

    #[test]
    fn test_engine_error_validation_not_retryable() {
        let err = EngineError::Validation(vec![ValidationError::new("id", "empty")]);
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_engine_error_persistence_retryable() {
        let err: EngineError = DispatchError::PersistenceError("disk full".to_string()).into();
        assert!(err.is_persistence());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_engine_error_duplicate_rule_id_predicate() {
        let err: EngineError = DispatchError::DuplicateRuleId("r1".to_string()).into();
        assert!(err.is_duplicate_rule_id());
        assert!(!err.is_retryable());
    }
}
