//! Ring-buffer + multi-index audit trail, batched and time-bucketed out to
//! a `StorageAdapter`.
//!
//! Every category/type/source/rule/correlation index is maintained
//! incrementally as entries are recorded and evicted, so `query` can pick
//! the most selective index instead of scanning the whole ring.

pub mod storage;

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::CorrelationId;
use crate::duration::EngineDuration;
use crate::error::DispatchError;
use crate::value::Value;
use storage::{PersistMetadata, PersistedRecord, StorageAdapter};

/// The five fixed buckets every `AuditEventType` maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    RuleManagement,
    RuleExecution,
    FactChange,
    EventEmitted,
    System,
}

impl AuditCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RuleManagement => "rule_management",
            Self::RuleExecution => "rule_execution",
            Self::FactChange => "fact_change",
            Self::EventEmitted => "event_emitted",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every audit event kind the engine records. `category()` is a fixed, total
/// mapping over every declared event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RuleRegistered,
    RuleUnregistered,
    RuleEnabled,
    RuleDisabled,
    RuleExecuted,
    RuleSkipped,
    RuleFailed,
    ActionFailed,
    FactCreated,
    FactUpdated,
    FactDeleted,
    EventEmitted,
    TimerSet,
    TimerCancelled,
    TimerFired,
    CascadeDepthExceeded,
    SystemStarted,
    SystemStopped,
}

impl AuditEventType {
    #[must_use]
    pub const fn category(self) -> AuditCategory {
        match self {
            Self::RuleRegistered | Self::RuleUnregistered | Self::RuleEnabled | Self::RuleDisabled => {
                AuditCategory::RuleManagement
            }
            Self::RuleExecuted | Self::RuleSkipped | Self::RuleFailed | Self::ActionFailed => {
                AuditCategory::RuleExecution
            }
            Self::FactCreated | Self::FactUpdated | Self::FactDeleted => AuditCategory::FactChange,
            Self::EventEmitted => AuditCategory::EventEmitted,
            Self::TimerSet
            | Self::TimerCancelled
            | Self::TimerFired
            | Self::CascadeDepthExceeded
            | Self::SystemStarted
            | Self::SystemStopped => AuditCategory::System,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RuleRegistered => "rule_registered",
            Self::RuleUnregistered => "rule_unregistered",
            Self::RuleEnabled => "rule_enabled",
            Self::RuleDisabled => "rule_disabled",
            Self::RuleExecuted => "rule_executed",
            Self::RuleSkipped => "rule_skipped",
            Self::RuleFailed => "rule_failed",
            Self::ActionFailed => "action_failed",
            Self::FactCreated => "fact_created",
            Self::FactUpdated => "fact_updated",
            Self::FactDeleted => "fact_deleted",
            Self::EventEmitted => "event_emitted",
            Self::TimerSet => "timer_set",
            Self::TimerCancelled => "timer_cancelled",
            Self::TimerFired => "timer_fired",
            Self::CascadeDepthExceeded => "cascade_depth_exceeded",
            Self::SystemStarted => "system_started",
            Self::SystemStopped => "system_stopped",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one thing the engine did or observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Optional context attached to a `record()` call — everything beyond
/// `event_type`/`details` that an audit entry can carry.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub rule_id: Option<String>,
    pub rule_name: Option<String>,
    pub source: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub duration_ms: Option<u64>,
}

impl RecordOptions {
    #[must_use]
    pub fn rule(mut self, rule_id: impl Into<String>, rule_name: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self.rule_name = Some(rule_name.into());
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub const fn correlation(mut self, correlation_id: Option<CorrelationId>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    #[must_use]
    pub const fn duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Tunables for `AuditLog`.
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    /// Ring buffer capacity (default 50,000).
    pub max_memory_entries: usize,
    /// Entries accumulated before an automatic flush.
    pub batch_size: usize,
    /// Elapsed time since the last flush before an automatic flush.
    pub flush_interval: EngineDuration,
    /// Key prefix for time-bucketed persistence (`"audit-log"` → `audit-log:YYYY-MM-DDTHH`).
    pub storage_key_prefix: String,
    /// Stamped into every `PersistMetadata.server_id`.
    pub server_id: String,
    pub schema_version: u32,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            max_memory_entries: 50_000,
            batch_size: 100,
            flush_interval: EngineDuration::from_millis(60_000),
            storage_key_prefix: "audit-log".to_string(),
            server_id: "reflexive".to_string(),
            schema_version: 1,
        }
    }
}

/// Filter dimensions for `AuditLog::query`. Every `Some` field narrows the
/// result; `None` allows all. Index selectivity order —
/// correlationId > ruleId > source > single-type > category > full scan —
/// decides how the *first* index probe is chosen; every other supplied field
/// is still applied as a secondary filter.
#[derive(Debug, Clone, Default)]
pub struct AuditQueryFilter {
    pub category: Option<AuditCategory>,
    pub event_type: Option<AuditEventType>,
    pub source: Option<String>,
    pub rule_id: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub offset: usize,
    pub limit: usize,
}

impl AuditQueryFilter {
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(cat) = self.category {
            if entry.category != cat {
                return false;
            }
        }
        if let Some(et) = self.event_type {
            if entry.event_type != et {
                return false;
            }
        }
        if let Some(src) = &self.source {
            if entry.source.as_deref() != Some(src.as_str()) {
                return false;
            }
        }
        if let Some(rid) = &self.rule_id {
            if entry.rule_id.as_deref() != Some(rid.as_str()) {
                return false;
            }
        }
        if let Some(cid) = self.correlation_id {
            if entry.correlation_id != Some(cid) {
                return false;
            }
        }
        true
    }
}

const fn default_limit() -> usize {
    100
}

/// Result of `AuditLog::query`.
#[derive(Debug, Clone)]
pub struct AuditQueryResult {
    pub entries: Vec<AuditEntry>,
    pub total_count: usize,
    pub query_time_ms: u64,
    pub has_more: bool,
}

#[derive(Default)]
struct Indexes {
    by_category: HashMap<AuditCategory, Vec<Uuid>>,
    by_type: HashMap<AuditEventType, Vec<Uuid>>,
    by_source: HashMap<String, Vec<Uuid>>,
    by_rule_id: HashMap<String, Vec<Uuid>>,
    by_correlation_id: HashMap<CorrelationId, Vec<Uuid>>,
}

impl Indexes {
    fn insert(&mut self, entry: &AuditEntry) {
        self.by_category.entry(entry.category).or_default().push(entry.id);
        self.by_type.entry(entry.event_type).or_default().push(entry.id);
        if let Some(src) = &entry.source {
            self.by_source.entry(src.clone()).or_default().push(entry.id);
        }
        if let Some(rid) = &entry.rule_id {
            self.by_rule_id.entry(rid.clone()).or_default().push(entry.id);
        }
        if let Some(cid) = entry.correlation_id {
            self.by_correlation_id.entry(cid).or_default().push(entry.id);
        }
    }

    fn remove(&mut self, entry: &AuditEntry) {
        if let Some(v) = self.by_category.get_mut(&entry.category) {
            v.retain(|id| *id != entry.id);
        }
        if let Some(v) = self.by_type.get_mut(&entry.event_type) {
            v.retain(|id| *id != entry.id);
        }
        if let Some(src) = &entry.source {
            if let Some(v) = self.by_source.get_mut(src) {
                v.retain(|id| *id != entry.id);
            }
        }
        if let Some(rid) = &entry.rule_id {
            if let Some(v) = self.by_rule_id.get_mut(rid) {
                v.retain(|id| *id != entry.id);
            }
        }
        if let Some(cid) = entry.correlation_id {
            if let Some(v) = self.by_correlation_id.get_mut(&cid) {
                v.retain(|id| *id != entry.id);
            }
        }
    }
}

struct Ring {
    order: VecDeque<Uuid>,
    by_id: HashMap<Uuid, AuditEntry>,
    indexes: Indexes,
}

impl Ring {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            by_id: HashMap::new(),
            indexes: Indexes::default(),
        }
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }

    fn insert(&mut self, entry: AuditEntry) {
        self.order.push_back(entry.id);
        self.indexes.insert(&entry);
        self.by_id.insert(entry.id, entry);
    }

    /// Evicts the oldest `count` entries.
    fn evict_oldest(&mut self, count: usize) {
        for _ in 0..count {
            let Some(id) = self.order.pop_front() else { break };
            if let Some(entry) = self.by_id.remove(&id) {
                self.indexes.remove(&entry);
            }
        }
    }

    fn candidates(&self, filter: &AuditQueryFilter) -> Vec<Uuid> {
        if let Some(cid) = filter.correlation_id {
            return self.indexes.by_correlation_id.get(&cid).cloned().unwrap_or_default();
        }
        if let Some(rid) = &filter.rule_id {
            return self.indexes.by_rule_id.get(rid).cloned().unwrap_or_default();
        }
        if let Some(src) = &filter.source {
            return self.indexes.by_source.get(src).cloned().unwrap_or_default();
        }
        if let Some(et) = filter.event_type {
            return self.indexes.by_type.get(&et).cloned().unwrap_or_default();
        }
        if let Some(cat) = filter.category {
            return self.indexes.by_category.get(&cat).cloned().unwrap_or_default();
        }
        self.order.iter().copied().collect()
    }
}

type Subscriber = Box<dyn Fn(&AuditEntry) + Send + Sync>;

/// Ring buffer + multi-index audit trail, with batched time-bucketed
/// persistence and real-time subscribers.
pub struct AuditLog {
    config: AuditLogConfig,
    storage: std::sync::Arc<dyn StorageAdapter>,
    ring: RwLock<Ring>,
    pending: RwLock<Vec<AuditEntry>>,
    subscribers: RwLock<Vec<Subscriber>>,
    last_flush: RwLock<DateTime<Utc>>,
}

impl AuditLog {
    #[must_use]
    pub fn new(config: AuditLogConfig, storage: std::sync::Arc<dyn StorageAdapter>) -> Self {
        Self {
            config,
            storage,
            ring: RwLock::new(Ring::new()),
            pending: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            last_flush: RwLock::new(Utc::now()),
        }
    }

    /// Registers a real-time subscriber, notified (best-effort, isolated)
    /// on every `record()`.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&AuditEntry) + Send + Sync + 'static,
    {
        self.subscribers.write().expect("audit subscriber lock poisoned").push(Box::new(handler));
    }

    /// Records one audit event: derives `category`/`summary`, stores it in
    /// the ring (evicting ~10% oldest if full), notifies subscribers, and
    /// enqueues it for the next flush.
    pub fn record(&self, event_type: AuditEventType, details: Value, options: RecordOptions) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category: event_type.category(),
            event_type,
            summary: derive_summary(event_type, &details, &options),
            source: options.source,
            details,
            rule_id: options.rule_id,
            rule_name: options.rule_name,
            correlation_id: options.correlation_id,
            duration_ms: options.duration_ms,
        };

        {
            let mut ring = self.ring.write().expect("audit ring lock poisoned");
            ring.insert(entry.clone());
            let over = ring.len().saturating_sub(self.config.max_memory_entries);
            if over > 0 {
                let evict = over.max(self.config.max_memory_entries / 10).max(1);
                ring.evict_oldest(evict);
            }
        }

        for subscriber in self.subscribers.read().expect("audit subscriber lock poisoned").iter() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| subscriber(&entry)));
        }

        self.pending.write().expect("audit pending lock poisoned").push(entry);

        let should_flush = {
            let pending_len = self.pending.read().expect("audit pending lock poisoned").len();
            let elapsed = Utc::now().signed_duration_since(*self.last_flush.read().expect("audit flush lock poisoned"));
            pending_len >= self.config.batch_size
                || elapsed.num_milliseconds() as u64 >= self.config.flush_interval.as_millis()
        };
        if should_flush {
            let _ = self.flush();
        }
    }

    /// Groups pending entries into UTC hourly buckets and merges each with
    /// any existing bucket state in storage.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::PersistenceError` if the adapter fails.
    pub fn flush(&self) -> Result<(), DispatchError> {
        let pending = {
            let mut guard = self.pending.write().expect("audit pending lock poisoned");
            std::mem::take(&mut *guard)
        };
        if pending.is_empty() {
            *self.last_flush.write().expect("audit flush lock poisoned") = Utc::now();
            return Ok(());
        }

        let mut by_bucket: HashMap<String, Vec<AuditEntry>> = HashMap::new();
        for entry in pending {
            let bucket = self.bucket_key(entry.timestamp);
            by_bucket.entry(bucket).or_default().push(entry);
        }

        for (key, mut new_entries) in by_bucket {
            let mut merged: Vec<AuditEntry> = match self.storage.load(&key) {
                Ok(Some(record)) => serde_json::from_value(record.state)
                    .map_err(|e| DispatchError::PersistenceError(e.to_string()))?,
                Ok(None) => Vec::new(),
                Err(e) => return Err(DispatchError::PersistenceError(e.to_string())),
            };
            merged.append(&mut new_entries);

            let state = serde_json::to_value(&merged).map_err(|e| DispatchError::PersistenceError(e.to_string()))?;
            let record = PersistedRecord {
                state,
                metadata: PersistMetadata {
                    persisted_at: Utc::now(),
                    server_id: self.config.server_id.clone(),
                    schema_version: self.config.schema_version,
                },
            };
            self.storage.save(&key, record).map_err(|e| DispatchError::PersistenceError(e.to_string()))?;
        }

        *self.last_flush.write().expect("audit flush lock poisoned") = Utc::now();
        Ok(())
    }

    /// Deletes in-memory entries older than `cutoff` and removes any
    /// storage bucket whose hour-end precedes it.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::PersistenceError` if the adapter fails.
    pub fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize, DispatchError> {
        let removed = {
            let mut ring = self.ring.write().expect("audit ring lock poisoned");
            let stale: Vec<Uuid> = ring
                .order
                .iter()
                .filter(|id| ring.by_id.get(id).is_some_and(|e| e.timestamp < cutoff))
                .copied()
                .collect();
            for id in &stale {
                if let Some(entry) = ring.by_id.remove(id) {
                    ring.indexes.remove(&entry);
                }
            }
            ring.order.retain(|id| !stale.contains(id));
            stale.len()
        };

        let prefix = format!("{}:", self.config.storage_key_prefix);
        let keys = self.storage.list_keys(&prefix).map_err(|e| DispatchError::PersistenceError(e.to_string()))?;
        for key in keys {
            if let Some(hour_str) = key.strip_prefix(&prefix) {
                if let Ok(hour_start) = chrono::NaiveDateTime::parse_from_str(hour_str, "%Y-%m-%dT%H") {
                    let hour_end = hour_start.and_utc() + chrono::Duration::hours(1) - chrono::Duration::milliseconds(1);
                    if hour_end < cutoff {
                        self.storage.delete(&key).map_err(|e| DispatchError::PersistenceError(e.to_string()))?;
                    }
                }
            }
        }

        Ok(removed)
    }

    /// Picks the most selective index available for `filter`, applies the
    /// remaining filter fields, and sorts ascending by timestamp. Ignores
    /// `offset`/`limit` — callers that paginate use `query`, callers that
    /// export the full matching set use this directly.
    fn matching_entries(&self, filter: &AuditQueryFilter) -> Vec<AuditEntry> {
        let ring = self.ring.read().expect("audit ring lock poisoned");
        let candidate_ids = ring.candidates(filter);
        let mut matched: Vec<AuditEntry> = candidate_ids
            .into_iter()
            .filter_map(|id| ring.by_id.get(&id).cloned())
            .filter(|entry| filter.matches(entry))
            .collect();
        matched.sort_by_key(|e| e.timestamp);
        matched
    }

    /// Picks the most selective index available for `filter`, applies the
    /// remaining filter fields, sorts ascending by timestamp, and paginates.
    #[must_use]
    pub fn query(&self, filter: AuditQueryFilter) -> AuditQueryResult {
        let start = std::time::Instant::now();
        let limit = if filter.limit == 0 { default_limit() } else { filter.limit };
        let offset = filter.offset;

        let matched = self.matching_entries(&filter);
        let total_count = matched.len();
        let page: Vec<AuditEntry> = matched.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + limit < total_count;

        AuditQueryResult {
            entries: page,
            total_count,
            query_time_ms: start.elapsed().as_millis() as u64,
            has_more,
        }
    }

    /// Exports every in-memory entry matching `filter` (no pagination) as a
    /// JSON array, in the same `AuditEntry` shape `query` returns (spec §6
    /// "Audit export").
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::PersistenceError` if serialization fails.
    pub fn export_json(&self, filter: AuditQueryFilter) -> Result<String, DispatchError> {
        let entries = self.matching_entries(&filter);
        serde_json::to_string_pretty(&entries).map_err(|e| DispatchError::PersistenceError(e.to_string()))
    }

    /// Exports every in-memory entry matching `filter` (no pagination) as
    /// CSV with header row `id,timestamp,category,type,summary,source,
    /// ruleId,ruleName,correlationId,details,durationMs` (spec §6 "Audit
    /// export"); `details` is embedded as a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::PersistenceError` if serializing a `details`
    /// value fails.
    pub fn export_csv(&self, filter: AuditQueryFilter) -> Result<String, DispatchError> {
        let entries = self.matching_entries(&filter);
        let mut out = String::from("id,timestamp,category,type,summary,source,ruleId,ruleName,correlationId,details,durationMs\n");
        for entry in entries {
            let details = serde_json::to_string(&entry.details).map_err(|e| DispatchError::PersistenceError(e.to_string()))?;
            out.push_str(&csv_field(&entry.id.to_string()));
            out.push(',');
            out.push_str(&csv_field(&entry.timestamp.to_rfc3339()));
            out.push(',');
            out.push_str(&csv_field(entry.category.as_str()));
            out.push(',');
            out.push_str(&csv_field(entry.event_type.as_str()));
            out.push(',');
            out.push_str(&csv_field(&entry.summary));
            out.push(',');
            out.push_str(&csv_field(entry.source.as_deref().unwrap_or("")));
            out.push(',');
            out.push_str(&csv_field(entry.rule_id.as_deref().unwrap_or("")));
            out.push(',');
            out.push_str(&csv_field(entry.rule_name.as_deref().unwrap_or("")));
            out.push(',');
            out.push_str(&csv_field(&entry.correlation_id.map(|c| c.to_string()).unwrap_or_default()));
            out.push(',');
            out.push_str(&csv_field(&details));
            out.push(',');
            out.push_str(&csv_field(&entry.duration_ms.map(|d| d.to_string()).unwrap_or_default()));
            out.push('\n');
        }
        Ok(out)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.read().expect("audit ring lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bucket_key(&self, timestamp: DateTime<Utc>) -> String {
        format!("{}:{}", self.config.storage_key_prefix, timestamp.format("%Y-%m-%dT%H"))
    }
}

/// Quotes `field` per RFC 4180 if it contains a comma, quote, or newline.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn derive_summary(event_type: AuditEventType, details: &Value, options: &RecordOptions) -> String {
    match (options.rule_id.as_deref(), event_type) {
        (Some(rule_id), _) => format!("{event_type} ({rule_id})"),
        (None, AuditEventType::EventEmitted) => {
            let topic = details.get_path("topic").map(Value::interpolated_string).unwrap_or_default();
            format!("event emitted: {topic}")
        }
        (None, _) => event_type.to_string(),
    }
}
