//! Concurrent, HMAC-signed webhook delivery with exponential backoff
//! (spec §4.12).
//!
//! Delivery runs on a small dedicated `tokio` runtime owned by this struct,
//! never the dispatcher thread — `deliver` spawns tasks and returns
//! immediately, matching §5's "external fan-out is parallel and isolated
//! from the core ... these never call back into the dispatcher".

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::duration::EngineDuration;
use crate::event_bus::{topic_matches, Event};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(Uuid);

impl WebhookId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WebhookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied webhook registration. Empty `patterns` defaults to
/// `["*"]` (resolved Open Question (b), spec §9).
#[derive(Debug, Clone)]
pub struct WebhookRegistrationInput {
    pub url: String,
    pub patterns: Vec<String>,
    pub secret: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub timeout: EngineDuration,
    pub enabled: bool,
}

impl Default for WebhookRegistrationInput {
    fn default() -> Self {
        Self {
            url: String::new(),
            patterns: Vec::new(),
            secret: None,
            headers: None,
            timeout: EngineDuration::from_millis(5_000),
            enabled: true,
        }
    }
}

/// A stored webhook registration.
#[derive(Debug, Clone)]
pub struct WebhookRegistration {
    pub id: WebhookId,
    pub url: String,
    pub patterns: Vec<String>,
    pub secret: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub timeout: EngineDuration,
    pub enabled: bool,
    pub created_at: chrono::DateTime<Utc>,
}

/// Outcome of one `deliver` attempt sequence for a single webhook.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub webhook_id: WebhookId,
    pub success: bool,
    pub status_code: Option<u16>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookFanoutConfig {
    pub max_retries: u32,
    pub retry_base_delay: EngineDuration,
    pub engine_name: String,
}

impl Default for WebhookFanoutConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: EngineDuration::from_millis(1_000),
            engine_name: "reflexive".to_string(),
        }
    }
}

/// Owns a dedicated small `tokio` runtime and `reqwest::Client`; registered
/// webhooks are matched against outgoing events by topic pattern.
pub struct WebhookFanout {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    config: WebhookFanoutConfig,
    registrations: RwLock<std::collections::HashMap<WebhookId, WebhookRegistration>>,
    total_delivered: Arc<AtomicU64>,
    total_failed: Arc<AtomicU64>,
}

impl WebhookFanout {
    #[must_use]
    pub fn new(config: WebhookFanoutConfig) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("reflexive-webhook")
            .enable_all()
            .build()
            .expect("failed to build webhook delivery runtime");

        Self {
            runtime,
            client: reqwest::Client::new(),
            config,
            registrations: RwLock::new(std::collections::HashMap::new()),
            total_delivered: Arc::new(AtomicU64::new(0)),
            total_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn register(&self, input: WebhookRegistrationInput) -> WebhookId {
        let id = WebhookId::new();
        let patterns = if input.patterns.is_empty() { vec!["*".to_string()] } else { input.patterns };
        let registration = WebhookRegistration {
            id,
            url: input.url,
            patterns,
            secret: input.secret,
            headers: input.headers.unwrap_or_default(),
            timeout: input.timeout,
            enabled: input.enabled,
            created_at: Utc::now(),
        };
        self.registrations.write().expect("webhook registrations lock poisoned").insert(id, registration);
        id
    }

    pub fn unregister(&self, id: WebhookId) -> bool {
        self.registrations.write().expect("webhook registrations lock poisoned").remove(&id).is_some()
    }

    pub fn set_enabled(&self, id: WebhookId, enabled: bool) -> bool {
        match self.registrations.write().expect("webhook registrations lock poisoned").get_mut(&id) {
            Some(reg) => {
                reg.enabled = enabled;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<WebhookRegistration> {
        self.registrations.read().expect("webhook registrations lock poisoned").values().cloned().collect()
    }

    #[must_use]
    pub fn total_delivered(&self) -> u64 {
        self.total_delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    /// Selects every enabled registration whose patterns match `event`'s
    /// topic and spawns a concurrent delivery task per match. Returns
    /// immediately; results land only in the delivery counters (and, in
    /// tests, via `deliver_and_wait`).
    pub fn deliver(&self, event: &Event) {
        // Fire-and-forget: the task keeps running on the runtime's own
        // worker threads after the handle is dropped here.
        drop(self.spawn_deliveries(event));
    }

    /// Test/diagnostic helper: delivers to every matching webhook and blocks
    /// until all attempts (including retries) complete.
    #[must_use]
    pub fn deliver_and_wait(&self, event: &Event) -> Vec<DeliveryResult> {
        self.runtime.block_on(async {
            let handles = self.spawn_deliveries(event);
            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                if let Ok(result) = handle.await {
                    results.push(result);
                }
            }
            results
        })
    }

    fn spawn_deliveries(&self, event: &Event) -> Vec<tokio::task::JoinHandle<DeliveryResult>> {
        let matching: Vec<WebhookRegistration> = {
            let guard = self.registrations.read().expect("webhook registrations lock poisoned");
            guard
                .values()
                .filter(|r| r.enabled && r.patterns.iter().any(|p| topic_matches(p, &event.topic)))
                .cloned()
                .collect()
        };

        let mut handles = Vec::with_capacity(matching.len());
        for registration in matching {
            let client = self.client.clone();
            let config = self.config.clone();
            let event = event.clone();
            let delivered = Arc::clone(&self.total_delivered);
            let failed = Arc::clone(&self.total_failed);
            let handle = self.runtime.spawn(async move {
                let result = deliver_one(client, registration, event, config).await;
                if result.success {
                    delivered.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                result
            });
            handles.push(handle);
        }
        handles
    }
}

async fn deliver_one(
    client: reqwest::Client,
    registration: WebhookRegistration,
    event: Event,
    config: WebhookFanoutConfig,
) -> DeliveryResult {
    let started = std::time::Instant::now();
    let delivery_id = Uuid::new_v4();
    let payload = serde_json::json!({
        "id": delivery_id,
        "webhookId": registration.id.to_string(),
        "event": event,
        "deliveredAt": Utc::now(),
    });
    let body = serde_json::to_string(&payload).unwrap_or_default();

    let mut last_status = None;
    let mut last_error = None;
    let attempts_cap = config.max_retries.max(1);

    for attempt in 1..=attempts_cap {
        if attempt > 1 {
            let backoff = config.retry_base_delay.as_millis() * 2u64.pow(attempt - 2);
            tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
        }

        let mut request = client
            .post(&registration.url)
            .timeout(registration.timeout.as_std())
            .header("Content-Type", "application/json")
            .header("User-Agent", format!("{}/1.0", config.engine_name))
            .body(body.clone());

        for (key, value) in &registration.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if let Some(secret) = &registration.secret {
            if let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) {
                mac.update(body.as_bytes());
                let signature = hex::encode(mac.finalize().into_bytes());
                request = request.header("X-Webhook-Signature", format!("sha256={signature}"));
            }
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                last_status = Some(status.as_u16());
                if status.is_success() {
                    return DeliveryResult {
                        webhook_id: registration.id,
                        success: true,
                        status_code: last_status,
                        attempts: attempt,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: None,
                    };
                }
                last_error = Some(format!("non-2xx status: {status}"));
            }
            Err(e) => {
                last_error = Some(e.to_string());
            }
        }
    }

    DeliveryResult {
        webhook_id: registration.id,
        success: false,
        status_code: last_status,
        attempts: attempts_cap,
        duration_ms: started.elapsed().as_millis() as u64,
        error: last_error,
    }
}
