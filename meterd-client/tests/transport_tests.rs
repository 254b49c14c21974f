//! Transport behavior against a stub metering endpoint
//!
//! Spins up a local axum listener standing in for the metering service and
//! exercises the batch drain, re-queue on failure, and the sync
//! transport's buffer-then-error fallback.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use meterd_client::{ClientConfig, MeterClient, NewEvent, TransportMode};

#[derive(Clone, Default)]
struct StubState {
    healthy: Arc<AtomicBool>,
    batch_posts: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn batch_handler(
    State(state): State<StubState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if !state.healthy.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})));
    }

    let events = body["events"].as_array().cloned().unwrap_or_default();
    let count = events.len();
    state.received.lock().unwrap().extend(events);
    state.batch_posts.fetch_add(1, Ordering::SeqCst);

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "status": "success",
            "events_processed": count,
            "event_ids": [],
        })),
    )
}

async fn event_handler(State(state): State<StubState>) -> impl IntoResponse {
    if !state.healthy.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})));
    }
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "status": "success",
            "events_processed": 1,
            "event_ids": [],
        })),
    )
}

async fn spawn_stub() -> (SocketAddr, StubState) {
    let state = StubState {
        healthy: Arc::new(AtomicBool::new(true)),
        ..StubState::default()
    };

    let app = Router::new()
        .route("/v1/meter/events", post(event_handler))
        .route("/v1/meter/events/batch", post(batch_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

fn event(feature: &str) -> NewEvent {
    NewEvent {
        tenant_id: "t1".to_string(),
        resource: "billing".to_string(),
        feature: feature.to_string(),
        quantity: 1,
        timestamp: None,
        metadata: None,
    }
}

fn batch_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        api_url: format!("http://{addr}"),
        transport_mode: TransportMode::Batch,
        batch_size: 3,
        batch_interval: Duration::from_millis(100),
        timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_worker_drains_in_one_post() {
    let (addr, stub) = spawn_stub().await;
    let client = MeterClient::new(batch_config(addr)).unwrap();

    for name in ["a", "b", "c"] {
        client.record(event(name)).await.unwrap();
    }

    let delivered = {
        let received = Arc::clone(&stub.received);
        wait_until(Duration::from_secs(3), move || {
            received.lock().unwrap().len() == 3
        })
        .await
    };
    assert!(delivered, "batch worker should deliver all three events");
    assert_eq!(stub.batch_posts.load(Ordering::SeqCst), 1);

    client.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_batch_is_requeued_and_redelivered() {
    let (addr, stub) = spawn_stub().await;
    let client = MeterClient::new(batch_config(addr)).unwrap();

    stub.healthy.store(false, Ordering::SeqCst);
    client.record(event("x")).await.unwrap();
    client.record(event("y")).await.unwrap();

    // Let at least one failing drain happen; the events must survive it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let requeued = {
        let probe = client.clone();
        wait_until(Duration::from_secs(2), move || probe.buffered() == 2).await
    };
    assert!(requeued, "failed batch must be re-queued");

    stub.healthy.store(true, Ordering::SeqCst);
    let delivered = {
        let received = Arc::clone(&stub.received);
        wait_until(Duration::from_secs(3), move || {
            received.lock().unwrap().len() == 2
        })
        .await
    };
    assert!(delivered, "re-queued events should arrive after recovery");

    client.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_flushes_pending_events() {
    let (addr, stub) = spawn_stub().await;
    let mut config = batch_config(addr);
    // Long interval: delivery can only happen via the shutdown flush.
    config.batch_interval = Duration::from_secs(3600);
    let client = MeterClient::new(config).unwrap();

    client.record(event("pending")).await.unwrap();
    client.shutdown().await;

    assert_eq!(stub.received.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_transport_buffers_then_surfaces_error() {
    // No listener on this port: every attempt fails fast.
    let config = ClientConfig {
        api_url: "http://127.0.0.1:1".to_string(),
        transport_mode: TransportMode::Sync,
        retry_max_attempts: 1,
        timeout: Duration::from_millis(300),
        ..ClientConfig::default()
    };
    let client = MeterClient::new(config).unwrap();

    let result = client.record(event("doomed")).await;
    assert!(result.is_err(), "sync transport must surface the failure");
    assert_eq!(client.buffered(), 1, "failed event must be buffered locally");
}
