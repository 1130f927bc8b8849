#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration-style connection tests.
//!
//! Drives a `Connection` against scripted negotiate responses and a
//! channel-driven mock transport, verifying when a transport is constructed,
//! which events fire, and how `is_connected`, `send` and `close` behave in
//! each lifecycle stage.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use signalr_connect::transport::Headers;
use signalr_connect::{ConnectionConfig, ConnectionEvent, ConnectionState, SignalRError};

use common::{core_v1_json, harness, harness_with, legacy_json, websockets_text_json, HOST};

fn assert_connection_error(event: &ConnectionEvent, needle: &str) {
    match event {
        ConnectionEvent::ConnectionError { reason } => assert!(
            reason.contains(needle),
            "reason {reason:?} does not mention {needle:?}"
        ),
        other => panic!("expected ConnectionError, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// End-to-end scenarios
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn scenario_a_compatible_response_connects() {
    let mut h = harness(200, &websockets_text_json("abc123"));
    h.connection.connect().unwrap();

    assert_eq!(h.next_event().await, ConnectionEvent::Connected);
    assert!(h.connection.is_connected());
    assert_eq!(h.connection.connection_id().as_deref(), Some("abc123"));

    let calls = h.connector_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, format!("ws://{HOST}"));
}

#[tokio::test]
async fn scenario_b_legacy_server_fails() {
    let mut h = harness(200, r#"{"ProtocolVersion":"1.0"}"#);
    h.connection.connect().unwrap();

    let event = h.next_event().await;
    assert_connection_error(&event, "ASP.NET SignalR");
    assert_eq!(h.connection.state(), ConnectionState::Failed);
    assert_eq!(h.transports_constructed(), 0);
    assert!(!h.connection.is_connected());
}

#[tokio::test]
async fn scenario_c_non_200_fails_without_parsing() {
    // The body would be compatible if it were parsed.
    let mut h = harness(500, &websockets_text_json("never"));
    h.connection.connect().unwrap();

    let event = h.next_event().await;
    assert_connection_error(&event, "500");
    assert_eq!(h.connection.state(), ConnectionState::Failed);
    assert_eq!(h.transports_constructed(), 0);
    assert!(h.connection.connection_id().is_none());
}

#[tokio::test]
async fn scenario_d_incompatible_transports_fail() {
    let mut h = harness(
        200,
        r#"{"availableTransports":[{"transport":"LongPolling","transferFormats":["Text"]}]}"#,
    );
    h.connection.connect().unwrap();

    let event = h.next_event().await;
    assert_connection_error(&event, "WebSockets");
    assert_eq!(h.connection.state(), ConnectionState::Failed);
    assert_eq!(h.transports_constructed(), 0);
}

#[tokio::test]
async fn scenario_e_closed_signal_is_relayed_verbatim() {
    let mut h = harness(200, &websockets_text_json("abc123"));
    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    let seen_closed = Arc::new(StdMutex::new(None));
    let seen = Arc::clone(&seen_closed);
    h.connection.on_closed(move |code, reason, clean| {
        *seen.lock().unwrap() = Some((code, reason.to_string(), clean));
    });

    h.server.close(1000, "normal");
    assert_eq!(
        h.next_event().await,
        ConnectionEvent::Closed {
            status_code: 1000,
            reason: "normal".into(),
            was_clean: true,
        }
    );
    assert!(!h.connection.is_connected());
    assert_eq!(h.connection.state(), ConnectionState::Closed);
    assert_eq!(
        *seen_closed.lock().unwrap(),
        Some((1000, "normal".to_string(), true))
    );
}

// ════════════════════════════════════════════════════════════════════
// Negotiation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn negotiate_request_uses_host_and_headers() {
    let config = ConnectionConfig::new(HOST)
        .with_header("Authorization", "Bearer t0k")
        .with_header("X-Requested-With", "signalr-connect");
    let mut h = harness_with(
        config,
        Ok(signalr_connect::HttpResponse::new(200, websockets_text_json("id"))),
        None,
        false,
    );
    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    let requests = h.http_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].0,
        format!("http://{HOST}/negotiate?negotiateVersion=1")
    );
    assert_eq!(requests[0].1["Authorization"], "Bearer t0k");

    // The transport handshake carries the same header set.
    let calls = h.connector_calls.lock().unwrap().clone();
    assert_eq!(calls[0].1, requests[0].1);
}

#[tokio::test]
async fn http_failure_fires_connection_error() {
    let mut h = harness_with(
        ConnectionConfig::new(HOST),
        Err(SignalRError::Http("connection refused".into())),
        None,
        false,
    );
    h.connection.connect().unwrap();

    let event = h.next_event().await;
    assert_connection_error(&event, "connection refused");
    assert_eq!(h.connection.state(), ConnectionState::Failed);
    assert_eq!(h.transports_constructed(), 0);
}

/// Log sink scoped to one test through a thread-local default subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<StdMutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn abort_paths_are_logged_to_the_installed_subscriber() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .finish();
    // The current-thread test runtime polls the connection task on this thread.
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut h = harness(503, "unavailable");
    h.connection.connect().unwrap();
    assert_connection_error(&h.next_event().await, "503");

    let text = logs.text();
    assert!(text.contains("negotiating"), "logs: {text}");
    assert!(
        text.contains("negotiate failed with status code 503"),
        "logs: {text}"
    );
}

#[tokio::test]
async fn malformed_body_reports_raw_body() {
    let mut h = harness(200, "definitely not json");
    h.connection.connect().unwrap();

    let event = h.next_event().await;
    assert_connection_error(&event, "definitely not json");
    assert_eq!(h.transports_constructed(), 0);
}

#[tokio::test]
async fn server_error_field_fires_connection_error() {
    let mut h = harness(200, r#"{"error":"Unauthorized"}"#);
    h.connection.connect().unwrap();

    let event = h.next_event().await;
    assert_connection_error(&event, "Unauthorized");
    assert_eq!(h.connection.state(), ConnectionState::Failed);
    assert_eq!(h.transports_constructed(), 0);
}

#[tokio::test]
async fn legacy_payload_never_constructs_transport() {
    let mut h = harness(200, legacy_json());
    h.connection.connect().unwrap();

    let _ = h.next_event().await;
    h.expect_quiet(50).await;
    assert_eq!(h.transports_constructed(), 0);
}

#[tokio::test]
async fn redirect_is_reported_not_followed() {
    let mut h = harness(200, r#"{"url":"https://other.example/hub","accessToken":"abc"}"#);
    h.connection.connect().unwrap();

    let event = h.next_event().await;
    assert_connection_error(&event, "https://other.example/hub");
    assert_eq!(h.connection.state(), ConnectionState::RedirectPending);
    assert_eq!(h.transports_constructed(), 0);
    assert_eq!(h.http_requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_transport_list_is_compatible() {
    let mut h = harness(200, r#"{"connectionId":"old-server"}"#);
    h.connection.connect().unwrap();

    assert_eq!(h.next_event().await, ConnectionEvent::Connected);
    assert_eq!(h.connection.connection_id().as_deref(), Some("old-server"));
}

#[tokio::test]
async fn connection_token_wins_over_connection_id() {
    let mut h = harness(200, core_v1_json());
    h.connection.connect().unwrap();

    assert_eq!(h.next_event().await, ConnectionEvent::Connected);
    assert_eq!(
        h.connection.connection_id().as_deref(),
        Some("1fa5c8e4-90a3-4a8b-a1d6-6c1b0f5b3f43")
    );
}

#[tokio::test]
async fn transport_construction_failure_fails_attempt() {
    let mut h = harness_with(
        ConnectionConfig::new(HOST),
        Ok(signalr_connect::HttpResponse::new(200, websockets_text_json("x"))),
        Some(SignalRError::TransportConstruction("invalid url".into())),
        false,
    );
    h.connection.connect().unwrap();

    let event = h.next_event().await;
    assert_connection_error(&event, "cannot start websocket");
    assert_eq!(h.connection.state(), ConnectionState::Failed);
    assert!(!h.connection.is_connected());
    assert_eq!(h.transports_constructed(), 1);
    h.expect_quiet(50).await;
}

#[tokio::test]
async fn second_connect_is_rejected_without_side_effects() {
    let mut h = harness(200, &websockets_text_json("abc"));
    h.connection.connect().unwrap();
    assert!(matches!(
        h.connection.connect(),
        Err(SignalRError::AlreadyStarted)
    ));

    assert_eq!(h.next_event().await, ConnectionEvent::Connected);
    h.expect_quiet(50).await;
    assert_eq!(h.http_requests.lock().unwrap().len(), 1);
    assert_eq!(h.transports_constructed(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Relay
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn messages_are_relayed_in_order() {
    let mut h = harness(200, &websockets_text_json("abc"));
    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    for n in 0..10 {
        h.server.text(&format!("frame-{n}\u{1e}"));
    }
    for n in 0..10 {
        assert_eq!(
            h.next_event().await,
            ConnectionEvent::Message(format!("frame-{n}\u{1e}"))
        );
    }
}

#[tokio::test]
async fn callbacks_fan_out_to_every_subscriber() {
    let mut h = harness(200, &websockets_text_json("abc"));
    let connected = Arc::new(AtomicUsize::new(0));
    let messages = Arc::new(StdMutex::new(Vec::new()));

    for _ in 0..2 {
        let c = Arc::clone(&connected);
        h.connection.on_connected(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
    }
    let m = Arc::clone(&messages);
    let id = h.connection.on_message(move |text| m.lock().unwrap().push(text.to_string()));

    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);
    assert_eq!(connected.load(Ordering::SeqCst), 2);

    h.server.text("one");
    let _ = h.next_event().await;
    assert!(h.connection.unsubscribe(id));
    h.server.text("two");
    let _ = h.next_event().await;

    assert_eq!(*messages.lock().unwrap(), vec!["one".to_string()]);
}

#[tokio::test]
async fn receive_error_is_followed_by_abnormal_close() {
    let mut h = harness(200, &websockets_text_json("abc"));
    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    h.server.error("connection reset by peer");
    let event = h.next_event().await;
    assert_connection_error(&event, "connection reset by peer");
    match h.next_event().await {
        ConnectionEvent::Closed {
            status_code,
            was_clean,
            ..
        } => {
            assert_eq!(status_code, 1006);
            assert!(!was_clean);
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(!h.connection.is_connected());
}

#[tokio::test]
async fn stream_end_is_unclean_close() {
    let mut h = harness(200, &websockets_text_json("abc"));
    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    h.server.end();
    assert_eq!(
        h.next_event().await,
        ConnectionEvent::Closed {
            status_code: 1006,
            reason: String::new(),
            was_clean: false,
        }
    );
}

// ════════════════════════════════════════════════════════════════════
// Event stream lifetime
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn event_stream_ends_after_failed_negotiation() {
    let mut h = harness(500, "");
    h.connection.connect().unwrap();

    assert_connection_error(&h.next_event().await, "500");
    h.expect_end().await;
    assert_eq!(h.connection.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn event_stream_ends_after_redirect() {
    let mut h = harness(200, r#"{"url":"https://other.test/hub"}"#);
    h.connection.connect().unwrap();

    assert_connection_error(&h.next_event().await, "https://other.test/hub");
    h.expect_end().await;
    assert_eq!(h.connection.state(), ConnectionState::RedirectPending);
}

#[tokio::test]
async fn event_stream_ends_after_server_close() {
    let mut h = harness(200, &websockets_text_json("abc"));
    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    h.server.close(1000, "done");
    assert_eq!(
        h.next_event().await,
        ConnectionEvent::Closed {
            status_code: 1000,
            reason: "done".into(),
            was_clean: true,
        }
    );
    h.expect_end().await;

    // Subscribing after the end yields an already finished stream.
    let mut late = h.connection.events();
    assert_eq!(late.recv().await, None);
}

#[tokio::test]
async fn panicking_message_subscriber_keeps_connection_alive() {
    let mut h = harness(200, &websockets_text_json("abc"));
    h.connection.on_message(|_| panic!("subscriber bug"));
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    h.connection
        .on_message(move |text| s.lock().unwrap().push(text.to_string()));

    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    h.server.text("one");
    assert_eq!(h.next_event().await, ConnectionEvent::Message("one".into()));
    assert!(h.connection.is_connected());

    h.server.text("two");
    assert_eq!(h.next_event().await, ConnectionEvent::Message("two".into()));
    h.connection.send("still here");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["one".to_string(), "two".to_string()]
    );
    assert_eq!(
        *h.server.sent.lock().unwrap(),
        vec!["still here".to_string()]
    );
}

// ════════════════════════════════════════════════════════════════════
// send / close / is_connected
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn send_and_close_before_connect_are_noops() {
    let mut h = harness(200, &websockets_text_json("abc"));

    assert!(!h.connection.is_connected());
    h.connection.send("dropped");
    h.connection.close(1000, "dropped");
    assert_eq!(h.connection.state(), ConnectionState::NotStarted);

    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(h.server.sent.lock().unwrap().is_empty());
    assert!(h.server.closes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn send_after_failure_is_noop() {
    let mut h = harness(503, "");
    h.connection.connect().unwrap();
    let _ = h.next_event().await;

    h.connection.send("dropped");
    h.connection.close(1000, "bye");
    h.expect_quiet(50).await;
    assert_eq!(h.transports_constructed(), 0);
}

#[tokio::test]
async fn send_forwards_payload_unmodified() {
    let mut h = harness(200, &websockets_text_json("abc"));
    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    h.connection.send("{\"protocol\":\"json\",\"version\":1}\u{1e}");
    h.connection.send(String::from("{\"type\":6}\u{1e}"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        *h.server.sent.lock().unwrap(),
        vec![
            "{\"protocol\":\"json\",\"version\":1}\u{1e}".to_string(),
            "{\"type\":6}\u{1e}".to_string(),
        ]
    );
}

#[tokio::test]
async fn close_is_answered_through_closed_event() {
    let mut h = harness_with(
        ConnectionConfig::new(HOST).with_close_timeout(Duration::from_millis(200)),
        Ok(signalr_connect::HttpResponse::new(200, websockets_text_json("abc"))),
        None,
        true,
    );
    h.connection.connect().unwrap();
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);

    h.connection.close(1000, "client done");
    assert_eq!(
        h.next_event().await,
        ConnectionEvent::Closed {
            status_code: 1000,
            reason: "client done".into(),
            was_clean: true,
        }
    );
    assert_eq!(
        *h.server.closes.lock().unwrap(),
        vec![(1000, "client done".to_string())]
    );

    // Nothing is forwarded once closed.
    h.connection.send("late");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.server.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn is_connected_is_false_while_negotiating() {
    let mut h = harness(200, &websockets_text_json("abc"));
    let mut observed = Vec::new();

    h.connection.connect().unwrap();
    observed.push(h.connection.is_connected());
    assert_eq!(h.next_event().await, ConnectionEvent::Connected);
    observed.push(h.connection.is_connected());
    h.server.close(1001, "going away");
    let _ = h.next_event().await;
    observed.push(h.connection.is_connected());

    assert_eq!(observed, vec![false, true, false]);
}

#[tokio::test]
async fn headers_and_host_are_exposed() {
    let mut headers = Headers::new();
    headers.insert("X-Id".into(), "1".into());
    let h = harness_with(
        ConnectionConfig::new(HOST).with_headers(headers.clone()),
        Ok(signalr_connect::HttpResponse::new(200, "{}")),
        None,
        false,
    );
    assert_eq!(h.connection.host(), HOST);
    assert_eq!(h.connection.headers(), &headers);
}
