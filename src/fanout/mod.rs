//! External fan-out: SSE streaming and webhook delivery.
//!
//! Both subsystems run off the dispatcher thread entirely — they are driven
//! by subscribing to `AuditLog`/`TraceCollector`/`Dispatcher` event streams
//! and never call back into the dispatcher with new stimuli (spec §5).
//! Gated behind the `fanout` Cargo feature so an embedder with no use for
//! HTTP delivery or streaming doesn't pull in `reqwest`/`tokio`.

pub mod sse;
pub mod webhook;

pub use sse::{SseConnectionId, SseFanout, SseFilter, SseSink};
pub use webhook::{DeliveryResult, WebhookFanout, WebhookFanoutConfig, WebhookId, WebhookRegistration};
