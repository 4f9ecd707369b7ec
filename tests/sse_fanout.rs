//! End-to-end scenario 4: SSE filter AND semantics and heartbeat pruning.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reflexive::duration::EngineDuration;
use reflexive::fanout::sse::SseEntryMeta;
use reflexive::fanout::{SseFanout, SseFilter, SseSink};

struct RecordingSink {
    chunks: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self { chunks: Mutex::new(Vec::new()) }
    }
}

impl SseSink for RecordingSink {
    fn write(&self, chunk: &str) -> bool {
        self.chunks.lock().unwrap().push(chunk.to_string());
        true
    }
}

struct ClosedSink {
    writes_attempted: Arc<AtomicUsize>,
}

impl SseSink for ClosedSink {
    fn write(&self, _chunk: &str) -> bool {
        self.writes_attempted.fetch_add(1, Ordering::SeqCst);
        false
    }
}

fn meta(category: &str, rule_id: &str) -> SseEntryMeta {
    SseEntryMeta { category: Some(category.to_string()), event_type: "rule_executed".to_string(), rule_id: Some(rule_id.to_string()), source: None }
}

#[test]
fn test_filter_ands_across_dimensions_and_connections_stay_disjoint() {
    let fanout = SseFanout::with_default_heartbeat();

    let conn_a_chunks = Arc::new(std::sync::Mutex::new(Vec::new()));
    struct SharedSink(Arc<std::sync::Mutex<Vec<String>>>);
    impl SseSink for SharedSink {
        fn write(&self, chunk: &str) -> bool {
            self.0.lock().unwrap().push(chunk.to_string());
            true
        }
    }

    let _conn_a = fanout.add_connection(
        SseFilter { category: Some("rule_execution".to_string()), rule_id: Some("r1".to_string()), ..Default::default() },
        Box::new(SharedSink(Arc::clone(&conn_a_chunks))),
    );

    let conn_b_chunks = Arc::new(std::sync::Mutex::new(Vec::new()));
    let _conn_b = fanout.add_connection(SseFilter { category: Some("fact_change".to_string()), ..Default::default() }, Box::new(SharedSink(Arc::clone(&conn_b_chunks))));

    // Matches connection A only: category AND rule_id both hold.
    fanout.broadcast(r#"{"id":1}"#, &meta("rule_execution", "r1"));
    // Matches neither: right category, wrong rule id.
    fanout.broadcast(r#"{"id":2}"#, &meta("rule_execution", "other"));
    // Matches connection B only.
    fanout.broadcast(r#"{"id":3}"#, &SseEntryMeta { category: Some("fact_change".to_string()), event_type: "fact_updated".to_string(), rule_id: None, source: None });

    let a_data: Vec<_> = conn_a_chunks.lock().unwrap().iter().filter(|c| c.starts_with("data:")).cloned().collect();
    let b_data: Vec<_> = conn_b_chunks.lock().unwrap().iter().filter(|c| c.starts_with("data:")).cloned().collect();

    assert_eq!(a_data.len(), 1);
    assert!(a_data[0].contains(r#""id":1"#));
    assert_eq!(b_data.len(), 1);
    assert!(b_data[0].contains(r#""id":3"#));

    assert_eq!(fanout.total_entries_sent(), 2);
    assert_eq!(fanout.total_entries_filtered(), 4); // each broadcast is checked against both connections
}

#[test]
fn test_connected_comment_and_filter_comment_written_on_connect() {
    let fanout = SseFanout::with_default_heartbeat();
    let sink = Arc::new(RecordingSink::new());
    struct Wrap(Arc<RecordingSink>);
    impl SseSink for Wrap {
        fn write(&self, chunk: &str) -> bool {
            self.0.write(chunk)
        }
    }
    fanout.add_connection(SseFilter { category: Some("system".to_string()), ..Default::default() }, Box::new(Wrap(Arc::clone(&sink))));

    let chunks = sink.chunks.lock().unwrap();
    assert!(chunks[0].starts_with(": connected:"));
    assert!(chunks[1].starts_with(": filter:"));
    assert!(chunks[1].contains("category=system"));
}

#[test]
fn test_heartbeat_prunes_a_forcibly_closed_sink() {
    let fanout = SseFanout::new(EngineDuration::from_millis(30));
    let writes_attempted = Arc::new(AtomicUsize::new(0));
    fanout.add_connection(SseFilter::default(), Box::new(ClosedSink { writes_attempted: Arc::clone(&writes_attempted) }));

    assert_eq!(fanout.connection_count(), 1);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(fanout.connection_count(), 0, "heartbeat sweep prunes the dead sink");
    assert!(writes_attempted.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_close_all_is_idempotent() {
    let fanout = SseFanout::with_default_heartbeat();
    fanout.add_connection(SseFilter::default(), Box::new(RecordingSink::new()));
    assert_eq!(fanout.connection_count(), 1);
    fanout.close_all();
    assert_eq!(fanout.connection_count(), 0);
    fanout.close_all();
    assert_eq!(fanout.connection_count(), 0);
    let _ = AtomicBool::new(false);
}
