//! Router and collector tests against an in-memory store.

use std::{sync::Arc, time::Duration};

use axum::{
  Router,
  body::Body,
  http::{HeaderMap, Request, StatusCode, header},
};
use futures_util::StreamExt as _;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tower::ServiceExt as _;
use vigil_core::{
  event::{HumanRequest, NewEvent, RequestKind},
  store::EventStore as _,
};
use vigil_store_sqlite::SqliteStore;

use crate::{
  Collector, CollectorConfig, DecisionEnvelope, HitlRegistry, Subscription, WebSocketTransport,
  router,
};

async fn collector_with(
  config: CollectorConfig,
  delivery_timeout: Duration,
) -> Arc<Collector<SqliteStore>> {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let registry =
    HitlRegistry::new(Arc::new(WebSocketTransport)).with_delivery_timeout(delivery_timeout);
  Arc::new(Collector::new(store, registry, config))
}

async fn collector() -> Arc<Collector<SqliteStore>> {
  collector_with(CollectorConfig::default(), Duration::from_secs(5)).await
}

async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
  let mut builder = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(v) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(v.to_string())
    }
    None => Body::empty(),
  };
  let resp = app.oneshot(builder.body(body).unwrap()).await.unwrap();
  let status = resp.status();
  let headers = resp.headers().clone();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
  (status, headers, json)
}

fn new_event(kind: &str, payload: Value) -> Value {
  json!({
    "producer_id": "app",
    "stream_id": "session-1",
    "event_kind": kind,
    "payload": payload,
  })
}

fn with_request(callback: &str) -> Value {
  let mut body = new_event("PreToolUse", json!({ "tool": "Bash" }));
  body["human_request"] = json!({
    "question": "Allow `cargo publish`?",
    "callback": callback,
    "kind": "permission",
  });
  body
}

fn stream_event(i: i64) -> NewEvent { NewEvent::new("app", "s1", "PostToolUse", json!({ "n": i })) }

// ─── Events ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
  let (status, _, body) = call(router(collector().await), "GET", "/health", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_returns_201_with_stored_event() {
  let c = collector().await;
  let (status, _, body) =
    call(router(c.clone()), "POST", "/events", Some(new_event("Stop", json!({ "ok": true })))).await;
  assert_eq!(status, StatusCode::CREATED);
  assert!(body["id"].as_i64().unwrap() > 0);
  assert_eq!(body["human_decision"]["status"], "absent");

  let id = body["id"].as_i64().unwrap();
  let (status, _, fetched) = call(router(c), "GET", &format!("/events/{id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(fetched, body);
}

#[tokio::test]
async fn invalid_events_are_400_and_not_stored() {
  let c = collector().await;

  let (status, _, body) =
    call(router(c.clone()), "POST", "/events", Some(json!({ "producer_id": "app" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].is_string());

  let (status, _, _) = call(
    router(c.clone()),
    "POST",
    "/events",
    Some(new_event("   ", json!({}))),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _, _) =
    call(router(c.clone()), "POST", "/events", Some(with_request("http://not-a-socket"))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (_, _, recent) = call(router(c), "GET", "/events/recent", None).await;
  assert_eq!(recent, json!([]));
}

#[tokio::test]
async fn events_with_large_transcripts_are_accepted() {
  let c = collector().await;
  let line = "x".repeat(1024);
  let chat: Vec<Value> = (0..3 * 1024).map(|i| json!({ "n": i, "text": line })).collect();
  let mut body = new_event("Stop", json!({}));
  body["chat"] = json!(chat);

  let (status, _, stored) = call(router(c), "POST", "/events", Some(body)).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(stored["chat"].as_array().unwrap().len(), 3 * 1024);
}

#[tokio::test]
async fn oversized_event_is_413() {
  let config = CollectorConfig { max_event_bytes: 1024, ..Default::default() };
  let c = collector_with(config, Duration::from_secs(5)).await;
  let body = new_event("Stop", json!({ "blob": "y".repeat(4096) }));

  let (status, _, err) = call(router(c.clone()), "POST", "/events", Some(body)).await;
  assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
  assert!(err["error"].is_string());
  assert!(c.store().recent(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_event_is_404() {
  let (status, _, body) = call(router(collector().await), "GET", "/events/999", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "event 999");
}

#[tokio::test]
async fn recent_is_newest_first() {
  let c = collector().await;
  for i in 0..4 {
    c.ingest(stream_event(i)).await.unwrap();
  }
  let (status, _, body) = call(router(c), "GET", "/events/recent?limit=2", None).await;
  assert_eq!(status, StatusCode::OK);
  let events = body.as_array().unwrap();
  assert_eq!(events.len(), 2);
  assert_eq!(events[0]["payload"]["n"], 3);
  assert_eq!(events[1]["payload"]["n"], 2);
}

#[tokio::test]
async fn search_applies_text_filters_and_cap() {
  let config = CollectorConfig { search_limit: 2, ..Default::default() };
  let c = collector_with(config, Duration::from_secs(5)).await;
  for i in 0..4 {
    c.ingest(NewEvent::new("web", "s1", "PostToolUse", json!({ "out": format!("error {i}") })))
      .await
      .unwrap();
  }
  c.ingest(NewEvent::new("cli", "s2", "PostToolUse", json!({ "out": "error cli" })))
    .await
    .unwrap();
  c.ingest(NewEvent::new("web", "s1", "Stop", json!({ "out": "clean" })))
    .await
    .unwrap();

  let (status, _, body) =
    call(router(c.clone()), "GET", "/events/search?q=error&limit=100", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body.as_array().unwrap().len(), 2);

  let (_, _, body) =
    call(router(c.clone()), "GET", "/events/search?q=error&producer_id=cli", None).await;
  let hits = body.as_array().unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0]["stream_id"], "s2");

  let (_, _, body) = call(
    router(c.clone()),
    "GET",
    "/events/search?q=&event_kind=Stop&producer_id=",
    None,
  )
  .await;
  assert_eq!(body.as_array().unwrap()[0]["payload"]["out"], "clean");

  let (status, _, _) = call(router(c), "GET", "/events/search?q=x&from=10&to=5", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn filter_options_lists_distinct_values() {
  let c = collector().await;
  c.ingest(NewEvent::new("web", "s1", "Stop", json!({}))).await.unwrap();
  c.ingest(NewEvent::new("cli", "s1", "SessionStart", json!({}))).await.unwrap();

  let (status, _, body) = call(router(c), "GET", "/events/filter-options", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["producer_ids"], json!(["cli", "web"]));
  assert_eq!(body["stream_ids"], json!(["s1"]));
  assert_eq!(body["event_kinds"], json!(["SessionStart", "Stop"]));
}

// ─── Decisions ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn respond_to_unknown_event_is_404() {
  let (status, _, _) = call(
    router(collector().await),
    "POST",
    "/events/41/respond",
    Some(json!({ "permission": true })),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_decision_is_400() {
  let c = collector().await;
  let (_, _, stored) =
    call(router(c.clone()), "POST", "/events", Some(with_request("ws://127.0.0.1:1/"))).await;
  let id = stored["id"].as_i64().unwrap();

  let (status, _, _) =
    call(router(c.clone()), "POST", &format!("/events/{id}/respond"), Some(json!({}))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (_, _, fetched) = call(router(c), "GET", &format!("/events/{id}"), None).await;
  assert_eq!(fetched["human_decision"]["status"], "pending");
}

#[tokio::test]
async fn unreachable_callback_still_resolves() {
  let c = collector().await;
  // Nothing listens on port 1.
  let (_, _, stored) =
    call(router(c.clone()), "POST", "/events", Some(with_request("ws://127.0.0.1:1/agent"))).await;
  let id = stored["id"].as_i64().unwrap();
  assert_eq!(stored["human_decision"]["status"], "pending");
  assert!(c.hitl().is_awaiting(id));

  let (status, headers, body) = call(
    router(c.clone()),
    "POST",
    &format!("/events/{id}/respond"),
    Some(json!({ "permission": false, "responded_by": "reviewer" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(headers["x-vigil-delivery"], "failed");
  assert_eq!(body["human_decision"]["status"], "resolved");
  assert_eq!(body["human_decision"]["decision"]["permission"], false);
  assert!(!c.hitl().is_awaiting(id));

  let (_, _, fetched) = call(router(c), "GET", &format!("/events/{id}"), None).await;
  assert_eq!(fetched["human_decision"]["status"], "resolved");
}

#[tokio::test]
async fn decision_reaches_a_listening_agent() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let agent = tokio::spawn(async move {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    loop {
      match ws.next().await {
        Some(Ok(Message::Text(text))) => return text.to_string(),
        Some(Ok(_)) => continue,
        other => panic!("agent socket ended early: {other:?}"),
      }
    }
  });

  let c = collector().await;
  let (_, _, stored) = call(
    router(c.clone()),
    "POST",
    "/events",
    Some(with_request(&format!("ws://{addr}/decision"))),
  )
  .await;
  let id = stored["id"].as_i64().unwrap();

  let (status, headers, _) = call(
    router(c),
    "POST",
    &format!("/events/{id}/respond"),
    Some(json!({ "permission": true })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(headers["x-vigil-delivery"], "delivered");

  let message = tokio::time::timeout(Duration::from_secs(5), agent).await.unwrap().unwrap();
  let envelope: DecisionEnvelope = serde_json::from_str(&message).unwrap();
  assert_eq!(envelope.event_id, id);
  assert_eq!(envelope.decision.permission, Some(true));
}

#[tokio::test]
async fn silent_agent_cannot_hold_a_request() {
  // Accepts TCP but never answers the WebSocket handshake.
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let (_stream, _) = listener.accept().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
  });

  let c = collector_with(CollectorConfig::default(), Duration::from_millis(200)).await;
  let stored = c
    .ingest({
      let mut e = stream_event(0);
      e.human_request = Some(HumanRequest {
        question:     "Continue?".into(),
        callback:     format!("ws://{addr}/"),
        kind:         RequestKind::Question,
        choices:      None,
        timeout_secs: Some(60),
      });
      e
    })
    .await
    .unwrap();

  let started = tokio::time::Instant::now();
  let (status, headers, body) = call(
    router(c),
    "POST",
    &format!("/events/{}/respond", stored.id),
    Some(json!({ "response": "yes" })),
  )
  .await;
  assert!(started.elapsed() < Duration::from_secs(3));
  assert_eq!(status, StatusCode::OK);
  assert_eq!(headers["x-vigil-delivery"], "timed_out");
  assert_eq!(body["human_decision"]["status"], "resolved");
}

// ─── Observers ───────────────────────────────────────────────────────────────

/// Read a subscription until it has produced `total` events, returning their
/// ids in arrival order (initial window first).
async fn drain(sub: &mut Subscription, total: usize) -> Vec<i64> {
  let mut ids = Vec::new();
  while ids.len() < total {
    let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
      .await
      .expect("observer stalled")
      .expect("observer dropped");
    let value: Value = serde_json::from_str(&message).unwrap();
    match value["type"].as_str() {
      Some("initial") => {
        ids.extend(value["data"].as_array().unwrap().iter().map(|e| e["id"].as_i64().unwrap()))
      }
      Some("event") => ids.push(value["data"]["id"].as_i64().unwrap()),
      other => panic!("unexpected message type {other:?}"),
    }
  }
  ids
}

async fn next_message(sub: &mut Subscription) -> Value {
  let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
    .await
    .expect("observer stalled")
    .expect("observer dropped");
  serde_json::from_str(&message).unwrap()
}

#[tokio::test]
async fn observers_see_the_resolved_event() {
  let c = collector_with(CollectorConfig::default(), Duration::from_millis(500)).await;
  let mut sub = c.subscribe().await.unwrap();
  assert_eq!(next_message(&mut sub).await["type"], "initial");

  let (_, _, stored) =
    call(router(c.clone()), "POST", "/events", Some(with_request("ws://127.0.0.1:1/agent"))).await;
  let id = stored["id"].as_i64().unwrap();
  let ingested = next_message(&mut sub).await;
  assert_eq!(ingested["type"], "event");
  assert_eq!(ingested["data"]["human_decision"]["status"], "pending");

  let (status, _, _) = call(
    router(c.clone()),
    "POST",
    &format!("/events/{id}/respond"),
    Some(json!({ "permission": true })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let resolved = next_message(&mut sub).await;
  assert_eq!(resolved["type"], "event");
  assert_eq!(resolved["data"]["id"], id);
  assert_eq!(resolved["data"]["human_decision"]["status"], "resolved");
  assert_eq!(resolved["data"]["human_decision"]["decision"]["permission"], true);
}

#[tokio::test]
async fn late_observer_sees_window_then_live() {
  let c = collector().await;
  let e1 = c.ingest(stream_event(1)).await.unwrap();
  let e2 = c.ingest(stream_event(2)).await.unwrap();

  let mut early = c.subscribe().await.unwrap();
  let e3 = c.ingest(stream_event(3)).await.unwrap();
  let mut late = c.subscribe().await.unwrap();
  let e4 = c.ingest(stream_event(4)).await.unwrap();

  assert_eq!(drain(&mut early, 4).await, vec![e1.id, e2.id, e3.id, e4.id]);
  assert_eq!(drain(&mut late, 4).await, vec![e1.id, e2.id, e3.id, e4.id]);
}

#[tokio::test]
async fn observers_agree_on_order_under_concurrency() {
  let c = collector().await;
  for i in 0..3 {
    c.ingest(stream_event(i)).await.unwrap();
  }
  let mut first = c.subscribe().await.unwrap();

  let mut tasks = Vec::new();
  for i in 3..13 {
    let c = c.clone();
    tasks.push(tokio::spawn(async move { c.ingest(stream_event(i)).await.unwrap().id }));
  }
  let second = {
    let c = c.clone();
    tokio::spawn(async move { c.subscribe().await.unwrap() })
  };
  for t in tasks {
    t.await.unwrap();
  }
  let mut second = second.await.unwrap();

  let a = drain(&mut first, 13).await;
  let b = drain(&mut second, 13).await;
  assert_eq!(a, b);
  assert!(a.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn websocket_stream_bootstraps_then_follows() {
  let c = collector().await;
  let before = c.ingest(stream_event(1)).await.unwrap();

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let app = router(c.clone());
  tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

  let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/stream"))
    .await
    .unwrap();

  let initial = next_json(&mut ws).await;
  assert_eq!(initial["type"], "initial");

  let window: Vec<i64> = initial["data"]
    .as_array()
    .unwrap()
    .iter()
    .map(|e| e["id"].as_i64().unwrap())
    .collect();
  assert_eq!(window, vec![before.id]);

  // Registered before the initial message went out, so this arrives live.
  let after = c.ingest(stream_event(2)).await.unwrap();
  let live = next_json(&mut ws).await;
  assert_eq!(live["type"], "event");
  assert_eq!(live["data"]["id"], after.id);
}

async fn next_json(ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> Value {
  loop {
    let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
      .await
      .expect("stream stalled")
      .expect("stream ended")
      .unwrap();
    if let Message::Text(text) = message {
      return serde_json::from_str(text.as_str()).unwrap();
    }
  }
}
