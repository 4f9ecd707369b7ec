//! End-to-end scenario 3: HMAC-signed webhook delivery with retry-then-succeed.
//!
//! Spins up a minimal raw-socket HTTP server (no mocking crate needed) that
//! answers a scripted sequence of status codes, one per accepted
//! connection, and captures each request's signature header and body.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use reflexive::event_bus::Event;
use reflexive::fanout::{WebhookFanout, WebhookFanoutConfig};
use reflexive::value::Value;

type HmacSha256 = Hmac<Sha256>;

struct CapturedRequest {
    signature: Option<String>,
    body: String,
}

/// Serves `statuses[0]` on the first accepted connection, `statuses[1]` on
/// the second, etc., then `500` for anything beyond. Captures every
/// request it reads.
fn spawn_mock_server(statuses: Vec<u16>) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock webhook server");
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let captured_thread = Arc::clone(&captured);

    std::thread::spawn(move || {
        for (idx, stream) in listener.incoming().enumerate() {
            let Ok(mut stream) = stream else { break };
            let status = statuses.get(idx).copied().unwrap_or(500);
            if let Some(request) = read_request(&mut stream) {
                captured_thread.lock().unwrap().push(request);
            }
            let reason = if status == 200 { "OK" } else { "ERR" };
            let response = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
    });

    (format!("http://{addr}"), captured)
}

fn read_request(stream: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 1 << 20 {
            return None;
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length: usize = header_text
        .lines()
        .find_map(|line| line.to_ascii_lowercase().starts_with("content-length:").then(|| line.split(':').nth(1)?.trim().parse().ok()).flatten())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let signature = header_text
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("x-webhook-signature:"))
        .map(|line| line.split_once(':').unwrap().1.trim().to_string());
    let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length.min(buf.len() - header_end)]).to_string();

    Some(CapturedRequest { signature, body })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[test]
fn test_webhook_signature_and_retry_then_success() {
    let secret = "s3cr3t";
    let (url, captured) = spawn_mock_server(vec![500, 500, 200]);

    let fanout = WebhookFanout::new(WebhookFanoutConfig {
        max_retries: 3,
        retry_base_delay: reflexive::duration::EngineDuration::from_millis(10),
        engine_name: "reflexive".to_string(),
    });
    use reflexive::fanout::webhook::WebhookRegistrationInput;
    fanout.register(WebhookRegistrationInput {
        url: url.clone(),
        patterns: vec!["order.*".to_string()],
        secret: Some(secret.to_string()),
        headers: None,
        timeout: reflexive::duration::EngineDuration::from_millis(2_000),
        enabled: true,
    });

    let mut data = BTreeMap::new();
    data.insert("orderId".to_string(), Value::String("ord-1".into()));
    let event = Event::new("order.paid", Value::Object(data), "test");

    let results = fanout.deliver_and_wait(&event);
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(fanout.total_delivered(), 1);
    assert_eq!(fanout.total_failed(), 0);

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 3, "two failed attempts plus the successful one");

    for request in captured.iter() {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(request.body.as_bytes());
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert_eq!(request.signature.as_deref(), Some(expected.as_str()));
    }
}

#[test]
fn test_webhook_delivery_exhausts_retries_and_reports_failure() {
    let (url, captured) = spawn_mock_server(vec![500, 500, 500]);

    let fanout = WebhookFanout::new(WebhookFanoutConfig {
        max_retries: 3,
        retry_base_delay: reflexive::duration::EngineDuration::from_millis(5),
        engine_name: "reflexive".to_string(),
    });
    use reflexive::fanout::webhook::WebhookRegistrationInput;
    fanout.register(WebhookRegistrationInput { url, patterns: Vec::new(), secret: None, headers: None, timeout: reflexive::duration::EngineDuration::from_millis(2_000), enabled: true });

    let event = Event::new("anything.at.all", Value::Null, "test");
    let results = fanout.deliver_and_wait(&event);
    assert_eq!(results.len(), 1, "empty patterns default to matching everything");

    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(fanout.total_failed(), 1);
    assert_eq!(captured.lock().unwrap().len(), 3);
}
