use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use reflexive::audit::storage::InMemoryStorageAdapter;
use reflexive::audit::{AuditLog, AuditLogConfig};
use reflexive::dispatcher::{Dispatcher, DispatcherConfig, ServiceInvoker};
use reflexive::rule::action::{Action, LogLevel};
use reflexive::rule::condition::{Condition, Operator};
use reflexive::rule::Trigger;
use reflexive::rule_input::RuleInput;
use reflexive::trace::TraceCollector;
use reflexive::value::Value;

struct NoopServiceInvoker;

impl ServiceInvoker for NoopServiceInvoker {
    fn invoke(&self, service: &str, method: &str, _args: &Value) -> Result<Value, String> {
        Err(format!("no service invoker configured for '{service}.{method}'"))
    }
}

fn make_dispatcher() -> Dispatcher {
    let audit = Arc::new(AuditLog::new(AuditLogConfig::default(), Arc::new(InMemoryStorageAdapter::new())));
    let trace = Arc::new(TraceCollector::new(1_000));
    Dispatcher::new(DispatcherConfig::default(), audit, trace, Arc::new(NoopServiceInvoker))
}

fn bench_emit_no_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_throughput");
    group.throughput(Throughput::Elements(1));

    group.bench_function("emit_no_matching_rule", |b| {
        b.iter_custom(|iters| {
            let dispatcher = make_dispatcher();
            let start = Instant::now();
            for _ in 0..iters {
                dispatcher.emit("unmatched.topic", Value::Null, "bench", None).unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_emit_single_rule_one_action(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_throughput");
    group.throughput(Throughput::Elements(1));

    group.bench_function("emit_one_rule_one_action", |b| {
        b.iter_custom(|iters| {
            let dispatcher = make_dispatcher();
            dispatcher
                .register_rule(RuleInput {
                    id: "r1".to_string(),
                    name: "Bench Rule".to_string(),
                    description: None,
                    priority: 0,
                    enabled: Some(true),
                    tags: Vec::new(),
                    group: None,
                    trigger: Trigger::Event { pattern: "order.*".to_string() },
                    temporal: std::collections::BTreeMap::new(),
                    conditions: vec![Condition::Leaf {
                        source: "event.status".to_string(),
                        operator: Operator::Eq,
                        value: Some(Value::String("paid".to_string())),
                    }],
                    actions: vec![Action::Log { level: LogLevel::Info, message: "order paid".to_string() }],
                })
                .unwrap()
                .unwrap();

            let data = Value::Object(
                [("status".to_string(), Value::String("paid".to_string()))].into_iter().collect(),
            );

            let start = Instant::now();
            for _ in 0..iters {
                dispatcher.emit("order.created", data.clone(), "bench", None).unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_cascading_rule(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_throughput");
    group.throughput(Throughput::Elements(1));

    group.bench_function("emit_cascading_chain", |b| {
        b.iter_custom(|iters| {
            let dispatcher = make_dispatcher();
            dispatcher
                .register_rule(RuleInput {
                    id: "hop1".to_string(),
                    name: "Hop 1".to_string(),
                    description: None,
                    priority: 0,
                    enabled: Some(true),
                    tags: Vec::new(),
                    group: None,
                    trigger: Trigger::Event { pattern: "chain.start".to_string() },
                    temporal: std::collections::BTreeMap::new(),
                    conditions: Vec::new(),
                    actions: vec![Action::Emit { topic: "chain.step2".to_string(), data: Value::Null }],
                })
                .unwrap()
                .unwrap();
            dispatcher
                .register_rule(RuleInput {
                    id: "hop2".to_string(),
                    name: "Hop 2".to_string(),
                    description: None,
                    priority: 0,
                    enabled: Some(true),
                    tags: Vec::new(),
                    group: None,
                    trigger: Trigger::Event { pattern: "chain.step2".to_string() },
                    temporal: std::collections::BTreeMap::new(),
                    conditions: Vec::new(),
                    actions: vec![Action::SetFact { key: "chain:done".to_string(), value: Value::Bool(true) }],
                })
                .unwrap()
                .unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                dispatcher.emit("chain.start", Value::Null, "bench", None).unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(dispatch, bench_emit_no_match, bench_emit_single_rule_one_action, bench_cascading_rule);
criterion_main!(dispatch);
