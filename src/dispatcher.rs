//! Single-worker-thread cooperative dispatcher.
//!
//! The `Dispatcher` owns exactly one dedicated OS thread holding the
//! `RuleRegistry`, `FactStore`, `TimerService`, `EventBus`, temporal detector
//! states, `AuditLog`, and `TraceCollector` — nothing touches them from any
//! other thread. Public methods are thin wrappers that send a `Command` over
//! a bounded `crossbeam-channel` and block on a bounded(1) reply channel;
//! this gives every caller a synchronous view of "the stimulus and its
//! entire cascade have finished" without requiring any lock outside the
//! worker thread.
//!
//! A stimulus (an emitted event, a fact change, a fired timer, a completed
//! temporal match) is processed by draining a FIFO work queue seeded with
//! that one stimulus: each matching rule's actions may append further
//! stimuli to the same queue, and the cascade ends when the queue empties or
//! `cascade_depth` is exceeded. Depth tracks causal generations (how many
//! stimuli deep a derived stimulus is from the seed), not the total number
//! of stimuli processed, so a single event fanning out to many rules in one
//! generation doesn't trip the cutoff on its own.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::audit::{AuditEventType, AuditLog, RecordOptions};
use crate::correlation::{CorrelationId, DispatchContext};
use crate::duration::EngineDuration;
use crate::error::{DispatchError, ValidationError};
use crate::event_bus::{Event, EventBus};
use crate::fact_store::{FactChangeKind, FactStore};
use crate::reference::{ResolutionScope, TriggerFactBinding};
use crate::rule::action::{Action, ActionExecutor, LogLevel, ResolvedAction};
use crate::rule::registry::{temporal_detector_id, RuleRegistry};
use crate::rule::{Rule, Trigger};
use crate::rule_input::{validate_rule_input, RuleInput};
use crate::temporal::{DetectorState, TemporalMatch};
use crate::timer_service::{FiredTimer, TimerService, TimerSpec};
use crate::trace::{TraceCollector, TraceEventType};
use crate::value::Value;

/// Tunables for the dispatcher worker.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Max queued commands before a caller's send blocks (spec has no
    /// caller-facing backpressure signal for synchronous calls, so this only
    /// bounds memory, not correctness).
    pub command_queue_capacity: usize,
    /// Cascade depth cutoff (spec §4.7 default 64).
    pub cascade_depth: usize,
    /// How often the worker sweeps timers and ticks temporal detectors.
    pub tick_interval: EngineDuration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 4096,
            cascade_depth: 64,
            tick_interval: EngineDuration::from_millis(50),
        }
    }
}

/// Pluggable handler for `call_service` actions. Remote execution itself is
/// out of scope (spec §1); the default `NoopServiceInvoker` always fails,
/// folding into `ActionFailure` rather than silently succeeding.
pub trait ServiceInvoker: Send + Sync {
    /// # Errors
    ///
    /// Returns a human-readable reason the call could not be completed.
    fn invoke(&self, service: &str, method: &str, args: &Value) -> Result<Value, String>;
}

struct NoopServiceInvoker;

impl ServiceInvoker for NoopServiceInvoker {
    fn invoke(&self, service: &str, method: &str, _args: &Value) -> Result<Value, String> {
        Err(format!("no service invoker configured for '{service}.{method}'"))
    }
}

type SubscriberHandler = Box<dyn Fn(&Event) + Send + Sync>;

enum Command {
    RegisterRule(RuleInput, Sender<Result<Rule, Vec<ValidationError>>>),
    UnregisterRule(String, Sender<bool>),
    EnableRule(String, Sender<bool>),
    DisableRule(String, Sender<bool>),
    GetRule(String, Sender<Option<Rule>>),
    ListRules(Sender<Vec<Rule>>),
    Emit {
        topic: String,
        data: Value,
        source: String,
        correlation_id: Option<CorrelationId>,
        reply: Sender<CorrelationId>,
    },
    SetFact {
        key: String,
        value: Value,
        correlation_id: Option<CorrelationId>,
        reply: Sender<CorrelationId>,
    },
    DeleteFact {
        key: String,
        correlation_id: Option<CorrelationId>,
        reply: Sender<CorrelationId>,
    },
    GetFact(String, Sender<Option<Value>>),
    MatchFacts(String, Sender<Vec<(String, Value)>>),
    SetTimer {
        spec: TimerSpec,
        correlation_id: Option<CorrelationId>,
        reply: Sender<()>,
    },
    CancelTimer(String, Sender<()>),
    IsTimerScheduled(String, Sender<bool>),
    SubscribeEvents(String, SubscriberHandler, Sender<()>),
    Flush(Sender<Result<(), DispatchError>>),
    CancelAllTimers(Sender<()>),
}

/// Owns the single worker thread driving the dispatch cascade.
pub struct Dispatcher {
    command_tx: Sender<Command>,
    audit: Arc<AuditLog>,
    trace: Arc<TraceCollector>,
    dropped_commands: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        audit: Arc<AuditLog>,
        trace: Arc<TraceCollector>,
        service_invoker: Arc<dyn ServiceInvoker>,
    ) -> Self {
        let capacity = config.command_queue_capacity.max(1);
        let (command_tx, command_rx) = bounded::<Command>(capacity);

        let state = EngineState {
            registry: RuleRegistry::new(),
            facts: FactStore::new(),
            timers: TimerService::new(),
            bus: EventBus::new(),
            detectors: std::collections::HashMap::new(),
            audit: Arc::clone(&audit),
            trace: Arc::clone(&trace),
            service_invoker,
            cascade_depth: config.cascade_depth,
        };

        let tick_interval = config.tick_interval.as_std();
        let join = thread::Builder::new()
            .name("reflexive-dispatcher".to_string())
            .spawn(move || worker_loop(state, command_rx, tick_interval))
            .expect("failed to spawn reflexive dispatcher worker");

        Self {
            command_tx,
            audit,
            trace,
            dropped_commands: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        }
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    #[must_use]
    pub fn trace(&self) -> &TraceCollector {
        &self.trace
    }

    #[must_use]
    pub fn dropped_commands(&self) -> u64 {
        self.dropped_commands.load(Ordering::Relaxed)
    }

    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T, DispatchError> {
        let (reply_tx, reply_rx) = bounded::<T>(1);
        self.command_tx.send(build(reply_tx)).map_err(|_| DispatchError::Disconnected)?;
        reply_rx.recv().map_err(|_| DispatchError::Disconnected)
    }

    /// # Errors
    ///
    /// Returns the collected `ValidationError`s if `input` is structurally
    /// invalid, or `DispatchError` if the worker is gone.
    pub fn register_rule(&self, input: RuleInput) -> Result<Result<Rule, Vec<ValidationError>>, DispatchError> {
        self.call(|reply| Command::RegisterRule(input, reply))
    }

    pub fn unregister_rule(&self, rule_id: &str) -> Result<bool, DispatchError> {
        self.call(|reply| Command::UnregisterRule(rule_id.to_string(), reply))
    }

    pub fn enable_rule(&self, rule_id: &str) -> Result<bool, DispatchError> {
        self.call(|reply| Command::EnableRule(rule_id.to_string(), reply))
    }

    pub fn disable_rule(&self, rule_id: &str) -> Result<bool, DispatchError> {
        self.call(|reply| Command::DisableRule(rule_id.to_string(), reply))
    }

    pub fn get_rule(&self, rule_id: &str) -> Result<Option<Rule>, DispatchError> {
        self.call(|reply| Command::GetRule(rule_id.to_string(), reply))
    }

    pub fn list_rules(&self) -> Result<Vec<Rule>, DispatchError> {
        self.call(Command::ListRules)
    }

    /// Emits `topic`/`data` and blocks until its entire cascade has been
    /// processed, returning the correlation id assigned (fresh, unless
    /// `correlation_id` is supplied to continue an existing chain).
    pub fn emit(
        &self,
        topic: impl Into<String>,
        data: Value,
        source: impl Into<String>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<CorrelationId, DispatchError> {
        let topic = topic.into();
        let source = source.into();
        self.call(|reply| Command::Emit { topic, data, source, correlation_id, reply })
    }

    pub fn set_fact(
        &self,
        key: impl Into<String>,
        value: Value,
        correlation_id: Option<CorrelationId>,
    ) -> Result<CorrelationId, DispatchError> {
        let key = key.into();
        self.call(|reply| Command::SetFact { key, value, correlation_id, reply })
    }

    pub fn delete_fact(&self, key: impl Into<String>, correlation_id: Option<CorrelationId>) -> Result<CorrelationId, DispatchError> {
        let key = key.into();
        self.call(|reply| Command::DeleteFact { key, correlation_id, reply })
    }

    pub fn get_fact(&self, key: &str) -> Result<Option<Value>, DispatchError> {
        self.call(|reply| Command::GetFact(key.to_string(), reply))
    }

    pub fn match_facts(&self, pattern: &str) -> Result<Vec<(String, Value)>, DispatchError> {
        self.call(|reply| Command::MatchFacts(pattern.to_string(), reply))
    }

    pub fn set_timer(&self, spec: TimerSpec, correlation_id: Option<CorrelationId>) -> Result<(), DispatchError> {
        self.call(|reply| Command::SetTimer { spec, correlation_id, reply })
    }

    pub fn cancel_timer(&self, name: &str) -> Result<(), DispatchError> {
        self.call(|reply| Command::CancelTimer(name.to_string(), reply))
    }

    pub fn is_timer_scheduled(&self, name: &str) -> Result<bool, DispatchError> {
        self.call(|reply| Command::IsTimerScheduled(name.to_string(), reply))
    }

    /// Registers an external subscriber to events matching `pattern`. The
    /// handler runs on the worker thread; it must never call back into the
    /// dispatcher (that would deadlock on the command channel).
    pub fn subscribe_events<F>(&self, pattern: impl Into<String>, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        self.call(|reply| Command::SubscribeEvents(pattern, Box::new(handler), reply))
    }

    /// Flushes the audit log's pending batch to its `StorageAdapter`.
    pub fn flush(&self) -> Result<(), DispatchError> {
        self.call(Command::Flush)?
    }

    /// Cancels every scheduled timer. Used by `Engine::stop()`.
    pub fn cancel_all_timers(&self) -> Result<(), DispatchError> {
        self.call(Command::CancelAllTimers)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Swap in a dummy, already-disconnected channel so the worker's
        // `recv` sees a closed channel and exits, then detach rather than
        // join: callers may have cloned `Arc<AuditLog>`/`Arc<TraceCollector>`
        // that outlive this dispatcher, and joining here could deadlock if
        // the worker were ever blocked waiting on state this thread holds.
        let (dummy_tx, _) = bounded::<Command>(1);
        let old = std::mem::replace(&mut self.command_tx, dummy_tx);
        drop(old);

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                drop(handle);
            }
        }
    }
}

/// Everything the worker thread owns exclusively.
struct EngineState {
    registry: RuleRegistry,
    facts: FactStore,
    timers: TimerService,
    bus: EventBus,
    detectors: std::collections::HashMap<String, DetectorState>,
    audit: Arc<AuditLog>,
    trace: Arc<TraceCollector>,
    service_invoker: Arc<dyn ServiceInvoker>,
    cascade_depth: usize,
}

/// A unit of work the cascade queue carries. Distinct from `Event`/
/// `FactChange`/`FiredTimer` so the dispatch loop can match on "what kind of
/// stimulus is this" without re-deriving it from a shared envelope.
enum Stimulus {
    Event(Event),
    FactChange { kind: FactChangeKind, key: String, value: Option<Value> },
    TimerFired(FiredTimer),
    Temporal(TemporalMatch),
}

fn worker_loop(mut state: EngineState, command_rx: Receiver<Command>, tick_interval: Duration) {
    loop {
        select! {
            recv(command_rx) -> msg => match msg {
                Ok(cmd) => handle_command(&mut state, cmd),
                Err(_) => break,
            },
            default(tick_interval) => {
                tick(&mut state);
            }
        }
    }
}

fn handle_command(state: &mut EngineState, cmd: Command) {
    match cmd {
        Command::RegisterRule(input, reply) => {
            let result = validate_rule_input(input).and_then(|rule| {
                for (name, pattern) in &rule.temporal {
                    let id = temporal_detector_id(&rule.id, name);
                    state.detectors.insert(id.clone(), DetectorState::new(id, pattern));
                }
                let rule_id = rule.id.clone();
                let rule_name = rule.name.clone();
                match state.registry.register(rule.clone()) {
                    Ok(()) => {
                        state.audit.record(
                            AuditEventType::RuleRegistered,
                            serde_json::json!({"ruleId": rule_id}).into(),
                            RecordOptions::default().rule(rule_id, rule_name),
                        );
                        Ok(rule)
                    }
                    Err(_) => Err(vec![ValidationError::new("id", "rule id is already registered")]),
                }
            });
            let _ = reply.send(result);
        }
        Command::UnregisterRule(id, reply) => {
            let removed = state.registry.unregister(&id);
            if removed {
                state.detectors.retain(|detector_id, _| !detector_id.starts_with(&format!("{id}:")));
                state.audit.record(
                    AuditEventType::RuleUnregistered,
                    serde_json::json!({"ruleId": id}).into(),
                    RecordOptions::default().rule(id.clone(), id),
                );
            }
            let _ = reply.send(removed);
        }
        Command::EnableRule(id, reply) => {
            let ok = state.registry.enable(&id);
            if ok {
                state.audit.record(
                    AuditEventType::RuleEnabled,
                    Value::Null,
                    RecordOptions::default().rule(id.clone(), id),
                );
            }
            let _ = reply.send(ok);
        }
        Command::DisableRule(id, reply) => {
            let ok = state.registry.disable(&id);
            if ok {
                state.audit.record(
                    AuditEventType::RuleDisabled,
                    Value::Null,
                    RecordOptions::default().rule(id.clone(), id),
                );
            }
            let _ = reply.send(ok);
        }
        Command::GetRule(id, reply) => {
            let _ = reply.send(state.registry.get(&id).cloned());
        }
        Command::ListRules(reply) => {
            let _ = reply.send(state.registry.all().into_iter().cloned().collect());
        }
        Command::Emit { topic, data, source, correlation_id, reply } => {
            let cid = correlation_id.unwrap_or_default();
            let event = Event::new(topic, data, source).with_correlation_id(cid);
            run_cascade(state, Stimulus::Event(event), cid);
            let _ = reply.send(cid);
        }
        Command::SetFact { key, value, correlation_id, reply } => {
            let cid = correlation_id.unwrap_or_default();
            let change = state.facts.set(key.clone(), value.clone());
            run_cascade(state, Stimulus::FactChange { kind: change.kind, key, value: Some(value) }, cid);
            let _ = reply.send(cid);
        }
        Command::DeleteFact { key, correlation_id, reply } => {
            let cid = correlation_id.unwrap_or_default();
            if let Some(change) = state.facts.delete(&key) {
                run_cascade(state, Stimulus::FactChange { kind: change.kind, key, value: None }, cid);
            }
            let _ = reply.send(cid);
        }
        Command::GetFact(key, reply) => {
            let _ = reply.send(state.facts.get(&key));
        }
        Command::MatchFacts(pattern, reply) => {
            let _ = reply.send(state.facts.matching(&pattern));
        }
        Command::SetTimer { spec, correlation_id, reply } => {
            let name = spec.name.clone();
            state.timers.set_timer(spec, correlation_id);
            state.audit.record(
                AuditEventType::TimerSet,
                serde_json::json!({"timer": name}).into(),
                RecordOptions::default().correlation(correlation_id),
            );
            let _ = reply.send(());
        }
        Command::CancelTimer(name, reply) => {
            state.timers.cancel_timer(&name);
            state.audit.record(
                AuditEventType::TimerCancelled,
                serde_json::json!({"timer": name}).into(),
                RecordOptions::default(),
            );
            let _ = reply.send(());
        }
        Command::IsTimerScheduled(name, reply) => {
            let _ = reply.send(state.timers.is_scheduled(&name));
        }
        Command::SubscribeEvents(pattern, handler, reply) => {
            state.bus.subscribe(pattern, handler);
            let _ = reply.send(());
        }
        Command::Flush(reply) => {
            let _ = reply.send(state.audit.flush());
        }
        Command::CancelAllTimers(reply) => {
            state.timers.clear_all();
            let _ = reply.send(());
        }
    }
}

fn tick(state: &mut EngineState) {
    let now = chrono::Utc::now();

    for fired in state.timers.take_expired() {
        let cid = fired.correlation_id.unwrap_or_default();
        run_cascade(state, Stimulus::TimerFired(fired), cid);
    }

    let ids: Vec<String> = state.detectors.keys().cloned().collect();
    for id in ids {
        let matched = state.detectors.get_mut(&id).and_then(|d| d.on_tick(now));
        if let Some(m) = matched {
            let cid = m.trigger_event.as_ref().and_then(|e| e.correlation_id).unwrap_or_default();
            run_cascade(state, Stimulus::Temporal(m), cid);
        }
    }
}

/// Drains the FIFO cascade queue seeded with `initial`, stopping when the
/// queue empties or `cascade_depth` is exceeded (spec §4.7). Depth is the
/// causal generation of a stimulus (the seed is generation 1, each stimulus
/// an action derives from it is generation+1) rather than a raw count of
/// queue pops, so a single level of wide fan-out — one event triggering many
/// emitting rules — does not by itself trip the cutoff.
fn run_cascade(state: &mut EngineState, initial: Stimulus, correlation_id: CorrelationId) {
    let mut queue: VecDeque<(usize, Stimulus)> = VecDeque::new();
    queue.push_back((1, initial));

    while let Some((depth, stimulus)) = queue.pop_front() {
        if depth > state.cascade_depth {
            state.audit.record(
                AuditEventType::CascadeDepthExceeded,
                serde_json::json!({"depth": depth, "limit": state.cascade_depth}).into(),
                RecordOptions::default().correlation(Some(correlation_id)),
            );
            tracing::warn!(depth, limit = state.cascade_depth, "cascade depth exceeded, dropping remaining queue");
            break;
        }

        process_stimulus(state, stimulus, correlation_id, depth, &mut queue);
    }
}

fn process_stimulus(state: &mut EngineState, stimulus: Stimulus, correlation_id: CorrelationId, depth: usize, queue: &mut VecDeque<(usize, Stimulus)>) {
    match stimulus {
        Stimulus::Event(event) => {
            state.audit.record(
                AuditEventType::EventEmitted,
                serde_json::json!({"topic": event.topic}).into(),
                RecordOptions::default().source(event.source.clone()).correlation(Some(correlation_id)),
            );
            state.bus.dispatch_to_subscribers(&event);
            feed_temporal_detectors(state, &event, depth, queue);

            let mut candidate_ids: Vec<String> = state.registry.candidates_for_event(&event.topic).into_iter().map(|r| r.id.clone()).collect();
            // Registration-order/priority sort is already applied by the registry; dedupe
            // preserves that order since ids are pushed in the order the registry returned.
            candidate_ids.dedup();

            let ctx = DispatchContext::new(Some(correlation_id));
            for rule_id in candidate_ids {
                run_rule(state, &rule_id, Some(&event), None, None, &ctx, depth, queue);
            }
        }
        Stimulus::FactChange { kind, key, value } => {
            let event_type = match kind {
                FactChangeKind::Created => AuditEventType::FactCreated,
                FactChangeKind::Updated => AuditEventType::FactUpdated,
                FactChangeKind::Deleted => AuditEventType::FactDeleted,
            };
            state.audit.record(
                event_type,
                serde_json::json!({"key": key}).into(),
                RecordOptions::default().correlation(Some(correlation_id)),
            );

            let candidate_ids: Vec<String> = state.registry.candidates_for_fact(&key).into_iter().map(|r| r.id.clone()).collect();
            let binding = TriggerFactBinding {
                key: key.clone(),
                value: value.clone().unwrap_or(Value::Null),
            };
            let ctx = DispatchContext::new(Some(correlation_id));
            for rule_id in candidate_ids {
                run_rule(state, &rule_id, None, Some(&binding), None, &ctx, depth, queue);
            }
        }
        Stimulus::TimerFired(fired) => {
            state.audit.record(
                AuditEventType::TimerFired,
                serde_json::json!({"timer": fired.name}).into(),
                RecordOptions::default().correlation(Some(correlation_id)),
            );

            let event = Event::new(fired.topic.clone(), fired.data.clone(), format!("timer:{}", fired.name)).with_correlation_id(correlation_id);
            state.bus.dispatch_to_subscribers(&event);
            feed_temporal_detectors(state, &event, depth, queue);

            let mut candidate_ids: Vec<String> = state.registry.candidates_for_timer(&fired.name).into_iter().map(|r| r.id.clone()).collect();
            for r in state.registry.candidates_for_event(&event.topic) {
                if !candidate_ids.contains(&r.id) {
                    candidate_ids.push(r.id.clone());
                }
            }

            let ctx = DispatchContext::new(Some(correlation_id));
            for rule_id in candidate_ids {
                run_rule(state, &rule_id, Some(&event), None, Some(&event), &ctx, depth, queue);
            }
        }
        Stimulus::Temporal(m) => {
            state.audit.record(
                AuditEventType::RuleExecuted,
                serde_json::json!({"detectorId": m.detector_id}).into(),
                RecordOptions::default().correlation(Some(correlation_id)),
            );

            let candidate_ids: Vec<String> = state.registry.candidates_for_temporal(&m.detector_id).into_iter().map(|r| r.id.clone()).collect();
            let ctx = DispatchContext::new(Some(correlation_id));
            for rule_id in candidate_ids {
                run_rule(state, &rule_id, m.trigger_event.as_ref(), None, m.trigger_event.as_ref(), &ctx, depth, queue);
            }
        }
    }
}

fn feed_temporal_detectors(state: &mut EngineState, event: &Event, depth: usize, queue: &mut VecDeque<(usize, Stimulus)>) {
    let now = chrono::Utc::now();
    let ids: Vec<String> = state.detectors.keys().cloned().collect();
    for id in ids {
        let matched = state.detectors.get_mut(&id).and_then(|d| d.on_event(event, now));
        if let Some(m) = matched {
            queue.push_back((depth + 1, Stimulus::Temporal(m)));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_rule(
    state: &mut EngineState,
    rule_id: &str,
    event: Option<&Event>,
    trigger_fact: Option<&TriggerFactBinding>,
    trigger_event: Option<&Event>,
    ctx: &DispatchContext,
    depth: usize,
    queue: &mut VecDeque<(usize, Stimulus)>,
) {
    let Some(rule) = state.registry.get(rule_id).cloned() else {
        return;
    };

    state.trace.record(TraceEventType::RuleTriggered, Some(&rule.id), Some(&rule.name), ctx.correlation_id, None, Value::Null);

    let scope = ResolutionScope {
        event,
        facts: &state.facts,
        context: ctx,
        trigger_fact,
        trigger_event,
    };

    let (passed, cond_err) = rule.conditions_pass(&scope);
    if let Some(err) = &cond_err {
        state.trace.record(
            TraceEventType::ConditionError,
            Some(&rule.id),
            Some(&rule.name),
            ctx.correlation_id,
            None,
            Value::String(err.to_string()),
        );
    }

    if !passed {
        state.audit.record(
            AuditEventType::RuleSkipped,
            serde_json::json!({"reason": "conditions_not_met"}).into(),
            RecordOptions::default().rule(rule.id.clone(), rule.name.clone()).correlation(ctx.correlation_id),
        );
        state.trace.record(TraceEventType::RuleSkipped, Some(&rule.id), Some(&rule.name), ctx.correlation_id, None, Value::Null);
        return;
    }

    let start = std::time::Instant::now();
    // `run_actions` and everything it calls take `&EngineState`: `FactStore`/
    // `TimerService`/`AuditLog`/`TraceCollector` all mutate through interior
    // locking, so this is a second shared borrow of `*state` alongside
    // `scope`'s `&state.facts`, not a conflicting mutable reborrow.
    let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        run_actions(state, &rule, &rule.actions, &scope, depth, queue);
    }));

    match run {
        Ok(()) => {
            state.audit.record(
                AuditEventType::RuleExecuted,
                Value::Null,
                RecordOptions::default()
                    .rule(rule.id.clone(), rule.name.clone())
                    .correlation(ctx.correlation_id)
                    .duration(start.elapsed().as_millis() as u64),
            );
            state.trace.record(
                TraceEventType::RuleExecuted,
                Some(&rule.id),
                Some(&rule.name),
                ctx.correlation_id,
                Some(start.elapsed().as_millis() as u64),
                Value::Null,
            );
        }
        Err(_) => {
            state.audit.record(
                AuditEventType::RuleFailed,
                serde_json::json!({"reason": "unexpected panic during action execution"}).into(),
                RecordOptions::default().rule(rule.id.clone(), rule.name.clone()).correlation(ctx.correlation_id),
            );
            tracing::error!(rule_id = %rule.id, "rule panicked during action execution");
        }
    }
}

fn run_actions(state: &EngineState, rule: &Rule, actions: &[Action], scope: &ResolutionScope<'_>, depth: usize, queue: &mut VecDeque<(usize, Stimulus)>) {
    for action in actions {
        let resolved = match ActionExecutor::resolve(action, scope) {
            Ok(r) => r,
            Err(e) => {
                record_action_failure(state, rule, action.name(), &e.to_string(), scope.context.correlation_id);
                continue;
            }
        };
        apply_resolved_action(state, rule, action.name(), resolved, scope.context.correlation_id, depth, queue);
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_resolved_action(
    state: &EngineState,
    rule: &Rule,
    action_name: &'static str,
    resolved: ResolvedAction,
    correlation_id: Option<CorrelationId>,
    depth: usize,
    queue: &mut VecDeque<(usize, Stimulus)>,
) {
    let cid = correlation_id.unwrap_or_default();
    state.trace.record(TraceEventType::ActionStarted, Some(&rule.id), Some(&rule.name), correlation_id, None, Value::Null);
    let start = std::time::Instant::now();

    let result = match resolved {
        ResolvedAction::SetFact { key, value } => apply_set_fact(state, key, value, cid, depth, queue),
        ResolvedAction::DeleteFact { key } => apply_delete_fact(state, key, cid, depth, queue),
        ResolvedAction::Emit { topic, data } => {
            if topic.trim().is_empty() || topic.contains("${") {
                Err(DispatchError::ReferenceResolutionError { path: topic })
            } else {
                let event = Event::new(topic, data, format!("rule:{}", rule.id)).with_correlation_id(cid);
                queue.push_back((depth + 1, Stimulus::Event(event)));
                Ok(())
            }
        }
        ResolvedAction::SetTimer { timer } => {
            if timer.name.trim().is_empty() || timer.name.contains("${") {
                Err(DispatchError::ReferenceResolutionError { path: timer.name })
            } else {
                state.timers.set_timer(timer, Some(cid));
                Ok(())
            }
        }
        ResolvedAction::CancelTimer { name } => {
            state.timers.cancel_timer(&name);
            Ok(())
        }
        ResolvedAction::CallService { service, method, args } => {
            if service.trim().is_empty() || method.trim().is_empty() {
                Err(DispatchError::ReferenceResolutionError { path: format!("{service}.{method}") })
            } else {
                state.service_invoker.invoke(&service, &method, &args).map(|_| ()).map_err(|reason| DispatchError::ActionFailure {
                    action: "call_service".to_string(),
                    reason,
                })
            }
        }
        ResolvedAction::Log { level, message } => {
            log_at_level(level, &rule.id, &message);
            Ok(())
        }
        ResolvedAction::Branch(nested) => {
            apply_branch(state, rule, nested, cid, depth, queue);
            Ok(())
        }
    };

    match result {
        Ok(()) => {
            state.trace.record(
                TraceEventType::ActionCompleted,
                Some(&rule.id),
                Some(&rule.name),
                correlation_id,
                Some(start.elapsed().as_millis() as u64),
                Value::Null,
            );
        }
        Err(e) => {
            record_action_failure(state, rule, action_name, &e.to_string(), correlation_id);
        }
    }
}

fn apply_branch(state: &EngineState, rule: &Rule, nested: Vec<ResolvedAction>, cid: CorrelationId, depth: usize, queue: &mut VecDeque<(usize, Stimulus)>) {
    for action in nested {
        apply_resolved_action(state, rule, "conditional_branch", action, Some(cid), depth, queue);
    }
}

fn apply_set_fact(state: &EngineState, key: String, value: Value, cid: CorrelationId, depth: usize, queue: &mut VecDeque<(usize, Stimulus)>) -> Result<(), DispatchError> {
    if key.trim().is_empty() || key.contains("${") {
        return Err(DispatchError::ReferenceResolutionError { path: key });
    }
    let change = state.facts.set(key.clone(), value.clone());
    queue.push_back((depth + 1, Stimulus::FactChange { kind: change.kind, key, value: Some(value) }));
    Ok(())
}

fn apply_delete_fact(state: &EngineState, key: String, cid: CorrelationId, depth: usize, queue: &mut VecDeque<(usize, Stimulus)>) -> Result<(), DispatchError> {
    if key.trim().is_empty() || key.contains("${") {
        return Err(DispatchError::ReferenceResolutionError { path: key });
    }
    if let Some(change) = state.facts.delete(&key) {
        queue.push_back((depth + 1, Stimulus::FactChange { kind: change.kind, key, value: None }));
    }
    let _ = cid;
    Ok(())
}

fn record_action_failure(state: &EngineState, rule: &Rule, action_name: &str, reason: &str, correlation_id: Option<CorrelationId>) {
    state.audit.record(
        AuditEventType::ActionFailed,
        serde_json::json!({"action": action_name, "reason": reason}).into(),
        RecordOptions::default().rule(rule.id.clone(), rule.name.clone()).correlation(correlation_id),
    );
    state.trace.record(
        TraceEventType::ActionFailed,
        Some(&rule.id),
        Some(&rule.name),
        correlation_id,
        None,
        serde_json::json!({"action": action_name, "reason": reason}).into(),
    );
    tracing::warn!(rule_id = %rule.id, action = action_name, reason, "action failed, rule continues");
}

fn log_at_level(level: LogLevel, rule_id: &str, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(rule_id, "{message}"),
        LogLevel::Debug => tracing::debug!(rule_id, "{message}"),
        LogLevel::Info => tracing::info!(rule_id, "{message}"),
        LogLevel::Warn => tracing::warn!(rule_id, "{message}"),
        LogLevel::Error => tracing::error!(rule_id, "{message}"),
    }
}
