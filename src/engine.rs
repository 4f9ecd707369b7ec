//! Top-level `Engine`: wires the `Dispatcher`, `AuditLog`, `TraceCollector`,
//! `PersistenceShim`, and (behind the `fanout` feature) the SSE/webhook
//! fan-outs into one handle, with one accessor method per subsystem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audit::storage::StorageAdapter;
use crate::audit::{AuditEventType, AuditLog, AuditLogConfig, RecordOptions};
use crate::dispatcher::{Dispatcher, DispatcherConfig, ServiceInvoker};
use crate::error::{EngineError, EngineResult};
use crate::persistence::{PersistenceConfig, PersistenceShim};
use crate::rule::Rule;
use crate::rule_input::RuleInput;
use crate::trace::TraceCollector;
use crate::value::Value;

#[cfg(feature = "fanout")]
use crate::duration::EngineDuration;
#[cfg(feature = "fanout")]
use crate::fanout::{SseEntryMeta, SseFanout, WebhookFanout, WebhookFanoutConfig};

/// Top-level engine tunables, aggregating every subsystem's own config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dispatcher: DispatcherConfig,
    pub audit: AuditLogConfig,
    pub persistence: PersistenceConfig,
    /// `TraceCollector` ring capacity (spec §4.10 is volatile/opt-in; default
    /// kept modest since it only matters while tracing is enabled).
    pub trace_capacity: usize,
    #[cfg(feature = "fanout")]
    pub sse_heartbeat: EngineDuration,
    #[cfg(feature = "fanout")]
    pub webhook: WebhookFanoutConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            audit: AuditLogConfig::default(),
            persistence: PersistenceConfig::default(),
            trace_capacity: 1_000,
            #[cfg(feature = "fanout")]
            sse_heartbeat: EngineDuration::from_millis(30_000),
            #[cfg(feature = "fanout")]
            webhook: WebhookFanoutConfig::default(),
        }
    }
}

/// Embeddable reactive rule engine. Construct one per process (or per
/// isolated ruleset); every public method either delegates straight to the
/// `Dispatcher`'s synchronous command round-trip or reads from the
/// independently thread-safe `AuditLog`/`TraceCollector`.
pub struct Engine {
    dispatcher: Dispatcher,
    persistence: PersistenceShim,
    stopped: AtomicBool,
    #[cfg(feature = "fanout")]
    sse_audit: Arc<SseFanout>,
    #[cfg(feature = "fanout")]
    sse_trace: Arc<SseFanout>,
    #[cfg(feature = "fanout")]
    webhook: Arc<WebhookFanout>,
}

impl Engine {
    /// Builds every subsystem, restores any previously persisted rule
    /// snapshot, and (behind `fanout`) wires the SSE streams and webhook
    /// fan-out to the audit/trace/event streams. Records `system_started`.
    #[must_use]
    pub fn new(config: EngineConfig, storage: Arc<dyn StorageAdapter>, service_invoker: Arc<dyn ServiceInvoker>) -> Self {
        let audit = Arc::new(AuditLog::new(config.audit, Arc::clone(&storage)));
        let trace = Arc::new(TraceCollector::new(config.trace_capacity));
        let persistence = PersistenceShim::new(config.persistence, Arc::clone(&storage));

        #[cfg(feature = "fanout")]
        let sse_audit = Arc::new(SseFanout::new(config.sse_heartbeat));
        #[cfg(feature = "fanout")]
        let sse_trace = Arc::new(SseFanout::new(config.sse_heartbeat));
        #[cfg(feature = "fanout")]
        let webhook = Arc::new(WebhookFanout::new(config.webhook));

        #[cfg(feature = "fanout")]
        {
            let sink = Arc::clone(&sse_audit);
            audit.subscribe(move |entry| {
                let meta = SseEntryMeta {
                    category: Some(entry.category.as_str().to_string()),
                    event_type: entry.event_type.as_str().to_string(),
                    rule_id: entry.rule_id.clone(),
                    source: entry.source.clone(),
                };
                if let Ok(json) = serde_json::to_string(entry) {
                    sink.broadcast(&json, &meta);
                }
            });

            let sink = Arc::clone(&sse_trace);
            trace.subscribe(move |entry| {
                let meta = SseEntryMeta {
                    category: None,
                    event_type: format!("{:?}", entry.event_type),
                    rule_id: entry.rule_id.clone(),
                    source: None,
                };
                if let Ok(json) = serde_json::to_string(entry) {
                    sink.broadcast(&json, &meta);
                }
            });
        }

        let dispatcher = Dispatcher::new(config.dispatcher, audit, trace, service_invoker);

        #[cfg(feature = "fanout")]
        {
            let hook = Arc::clone(&webhook);
            let _ = dispatcher.subscribe_events("*", move |event| hook.deliver(event));
        }

        let engine = Self {
            dispatcher,
            persistence,
            stopped: AtomicBool::new(false),
            #[cfg(feature = "fanout")]
            sse_audit,
            #[cfg(feature = "fanout")]
            sse_trace,
            #[cfg(feature = "fanout")]
            webhook,
        };

        engine.restore_rules();
        engine.audit().record(AuditEventType::SystemStarted, Value::Null, RecordOptions::default());
        engine
    }

    fn restore_rules(&self) {
        for rule in self.persistence.load_snapshot().unwrap_or_default() {
            let input = rule_to_input(rule);
            let _ = self.dispatcher.register_rule(input);
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        self.dispatcher.audit()
    }

    #[must_use]
    pub fn trace(&self) -> &TraceCollector {
        self.dispatcher.trace()
    }

    #[cfg(feature = "fanout")]
    #[must_use]
    pub fn sse_audit(&self) -> &SseFanout {
        &self.sse_audit
    }

    #[cfg(feature = "fanout")]
    #[must_use]
    pub fn sse_trace(&self) -> &SseFanout {
        &self.sse_trace
    }

    #[cfg(feature = "fanout")]
    #[must_use]
    pub fn webhook(&self) -> &WebhookFanout {
        &self.webhook
    }

    /// Snapshots the current rule set through the configured
    /// `StorageAdapter`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Dispatch` if the worker is gone, or wraps a
    /// `PersistenceError` if the adapter write fails.
    pub fn save_rules_snapshot(&self) -> EngineResult<()> {
        let rules: Vec<Rule> = self.dispatcher.list_rules()?;
        self.persistence
            .save_snapshot(&rules)
            .map_err(|e| EngineError::from(crate::error::DispatchError::PersistenceError(e.to_string())))
    }

    /// Idempotent shutdown sequence (spec §5): drains the queue (implicit —
    /// every in-flight `call` already blocks until its cascade finishes),
    /// flushes the audit log, closes SSE connections, cancels every timer.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the worker is already disconnected or the
    /// audit flush fails; the engine is still marked stopped either way.
    pub fn stop(&self) -> EngineResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.audit().record(AuditEventType::SystemStopped, Value::Null, RecordOptions::default());
        let flush_result = self.dispatcher.flush();

        #[cfg(feature = "fanout")]
        {
            self.sse_audit.close_all();
            self.sse_trace.close_all();
        }

        let timer_result = self.dispatcher.cancel_all_timers();

        flush_result?;
        timer_result?;
        Ok(())
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn rule_to_input(rule: Rule) -> RuleInput {
    RuleInput {
        id: rule.id,
        name: rule.name,
        description: rule.description,
        priority: rule.priority,
        enabled: Some(rule.enabled),
        tags: rule.tags,
        group: rule.group,
        trigger: rule.trigger,
        temporal: rule.temporal,
        conditions: rule.conditions,
        actions: rule.actions,
    }
}
