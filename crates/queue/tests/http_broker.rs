//! HTTP push broker against a local test server.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use chrono::Utc;
use habitgraph_core::{
    BrokerError, PushBroker, PushGateway, PushGatewayConfig, PushMessage,
};
use habitgraph_queue::HttpPushBroker;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Received {
    batches: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn accept_batch(
    State(received): State<Received>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> StatusCode {
    received.batches.lock().await.push(body);
    StatusCode::ACCEPTED
}

async fn reject_batch() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/")
}

fn message(id: &str) -> PushMessage {
    PushMessage {
        message_id: id.to_string(),
        user_id: "u1".to_string(),
        kind: "badge".to_string(),
        title: "Badge earned".to_string(),
        body: "You earned the Early bird badge".to_string(),
        dedupe_key: "badge:b1".to_string(),
        deep_link: Some("/badges/b1".to_string()),
        data: None,
        ttl_seconds: 3600,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_gateway_delivers_batches_over_http() {
    let received = Received::default();
    let router = Router::new()
        .route("/v1/push/batch", post(accept_batch))
        .with_state(received.clone());
    let base = serve(router).await;

    let broker = Arc::new(HttpPushBroker::new(&base, Duration::from_secs(5)).unwrap());
    let gateway = PushGateway::start(broker, PushGatewayConfig::default(), CancellationToken::new());

    gateway.enqueue(message("m1")).unwrap();
    gateway.enqueue(message("m2")).unwrap();
    gateway.close().await;

    let batches = received.batches.lock().await;
    let messages: Vec<&serde_json::Value> = batches
        .iter()
        .flat_map(|b| b["messages"].as_array().unwrap())
        .collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["messageId"], "m1");
    assert_eq!(messages[0]["type"], "badge");
    assert_eq!(messages[0]["deepLink"], "/badges/b1");
    assert_eq!(gateway.stats().sent, 2);
}

#[tokio::test]
async fn test_rejected_batch_surfaces_status() {
    let router = Router::new().route("/v1/push/batch", post(reject_batch));
    let base = serve(router).await;

    let broker = HttpPushBroker::new(&base, Duration::from_secs(5)).unwrap();
    let result = broker.send_batch(&[message("m1")]).await;

    assert!(matches!(result, Err(BrokerError::Rejected(503))));
}

#[tokio::test]
async fn test_closed_broker_refuses_requests() {
    let received = Received::default();
    let router = Router::new()
        .route("/v1/push/batch", post(accept_batch))
        .with_state(received.clone());
    let base = serve(router).await;

    let broker = HttpPushBroker::new(&base, Duration::from_secs(5)).unwrap();
    broker.send_batch(&[message("m1")]).await.unwrap();

    broker.close().await;
    // A second close is a no-op.
    broker.close().await;

    assert!(matches!(
        broker.send_batch(&[message("m2")]).await,
        Err(BrokerError::Transport(_))
    ));
    assert!(matches!(broker.probe().await, Err(BrokerError::Transport(_))));
    assert_eq!(received.batches.lock().await.len(), 1);
}
