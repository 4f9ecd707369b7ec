//! Filtered Server-Sent-Events fan-out (spec §4.11), used identically for
//! the audit stream and the trace ("debug") stream.
//!
//! Transport is deliberately out of scope here, the same way
//! `ServiceInvoker` keeps `call_service` execution pluggable: an embedder
//! wires an HTTP framework's response writer into an `SseSink` and this
//! module only decides what to write and when to prune.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::duration::EngineDuration;

/// One write destination for a streaming connection. `write` returns `false`
/// once the underlying transport can no longer accept data (client gone,
/// broken pipe) — the connection is pruned on the next broadcast or
/// heartbeat.
pub trait SseSink: Send + Sync {
    fn write(&self, chunk: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SseConnectionId(Uuid);

impl SseConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SseConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata one broadcast entry (an `AuditEntry` or `TraceEntry`) exposes to
/// the filter, independent of its JSON payload.
#[derive(Debug, Clone, Default)]
pub struct SseEntryMeta {
    pub category: Option<String>,
    pub event_type: String,
    pub rule_id: Option<String>,
    pub source: Option<String>,
}

/// Per-connection filter. Dimensions AND together; an empty (`None`)
/// dimension allows everything through for that dimension (spec §4.11).
#[derive(Debug, Clone, Default)]
pub struct SseFilter {
    pub category: Option<String>,
    pub event_type: Option<String>,
    pub rule_id: Option<String>,
    pub source: Option<String>,
}

impl SseFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.event_type.is_none() && self.rule_id.is_none() && self.source.is_none()
    }

    #[must_use]
    pub fn matches(&self, meta: &SseEntryMeta) -> bool {
        if let Some(cat) = &self.category {
            if meta.category.as_deref() != Some(cat.as_str()) {
                return false;
            }
        }
        if let Some(et) = &self.event_type {
            if meta.event_type != *et {
                return false;
            }
        }
        if let Some(rid) = &self.rule_id {
            if meta.rule_id.as_deref() != Some(rid.as_str()) {
                return false;
            }
        }
        if let Some(src) = &self.source {
            if meta.source.as_deref() != Some(src.as_str()) {
                return false;
            }
        }
        true
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(c) = &self.category {
            parts.push(format!("category={c}"));
        }
        if let Some(e) = &self.event_type {
            parts.push(format!("type={e}"));
        }
        if let Some(r) = &self.rule_id {
            parts.push(format!("ruleId={r}"));
        }
        if let Some(s) = &self.source {
            parts.push(format!("source={s}"));
        }
        parts.join(",")
    }
}

struct Connection {
    id: SseConnectionId,
    filter: SseFilter,
    #[allow(dead_code)]
    connected_at: DateTime<Utc>,
    sink: Box<dyn SseSink>,
}

struct Inner {
    connections: RwLock<Vec<Connection>>,
    total_sent: AtomicU64,
    total_filtered: AtomicU64,
}

impl Inner {
    fn heartbeat_once(&self) {
        let mut guard = self.connections.write().expect("sse connections lock poisoned");
        guard.retain(|c| c.sink.write(": heartbeat\n\n"));
    }

    fn broadcast_once(&self, json: &str, meta: &SseEntryMeta) {
        let mut guard = self.connections.write().expect("sse connections lock poisoned");
        let mut dead = Vec::new();
        for (idx, conn) in guard.iter().enumerate() {
            if conn.filter.matches(meta) {
                if conn.sink.write(&format!("data: {json}\n\n")) {
                    self.total_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    dead.push(idx);
                }
            } else {
                self.total_filtered.fetch_add(1, Ordering::Relaxed);
            }
        }
        for idx in dead.into_iter().rev() {
            guard.remove(idx);
        }
    }
}

/// Filtered SSE fan-out with a background heartbeat sweep.
pub struct SseFanout {
    inner: Arc<Inner>,
    heartbeat_thread: Mutex<Option<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
}

impl SseFanout {
    #[must_use]
    pub fn new(heartbeat_interval: EngineDuration) -> Self {
        let inner = Arc::new(Inner {
            connections: RwLock::new(Vec::new()),
            total_sent: AtomicU64::new(0),
            total_filtered: AtomicU64::new(0),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let thread_inner = Arc::clone(&inner);
        let thread_stop = Arc::clone(&stop);
        let interval = heartbeat_interval.as_std();
        let handle = std::thread::Builder::new()
            .name("reflexive-sse-heartbeat".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if thread_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    thread_inner.heartbeat_once();
                }
            })
            .expect("failed to spawn sse heartbeat thread");

        Self {
            inner,
            heartbeat_thread: Mutex::new(Some(handle)),
            stop,
        }
    }

    /// Default 30s heartbeat interval (spec §4.11).
    #[must_use]
    pub fn with_default_heartbeat() -> Self {
        Self::new(EngineDuration::from_millis(30_000))
    }

    /// Registers a connection, writing the `connected:<id>` comment and, if
    /// `filter` is non-empty, a `filter:<desc>` comment.
    pub fn add_connection(&self, filter: SseFilter, sink: Box<dyn SseSink>) -> SseConnectionId {
        let id = SseConnectionId::new();
        sink.write(&format!(": connected:{id}\n\n"));
        if !filter.is_empty() {
            sink.write(&format!(": filter:{}\n\n", filter.describe()));
        }
        let connection = Connection { id, filter, connected_at: Utc::now(), sink };
        self.inner.connections.write().expect("sse connections lock poisoned").push(connection);
        id
    }

    pub fn remove_connection(&self, id: SseConnectionId) {
        self.inner.connections.write().expect("sse connections lock poisoned").retain(|c| c.id != id);
    }

    /// Delivers one entry to every connection whose filter matches,
    /// pruning any sink that rejects the write.
    pub fn broadcast(&self, json: &str, meta: &SseEntryMeta) {
        self.inner.broadcast_once(json, meta);
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().expect("sse connections lock poisoned").len()
    }

    #[must_use]
    pub fn total_entries_sent(&self) -> u64 {
        self.inner.total_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_entries_filtered(&self) -> u64 {
        self.inner.total_filtered.load(Ordering::Relaxed)
    }

    /// Closes every connection, idempotent.
    pub fn close_all(&self) {
        self.inner.connections.write().expect("sse connections lock poisoned").clear();
    }
}

impl PartialEq for SseConnectionId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for SseConnectionId {}

impl Drop for SseFanout {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.heartbeat_thread.lock() {
            if let Some(handle) = guard.take() {
                drop(handle);
            }
        }
    }
}
