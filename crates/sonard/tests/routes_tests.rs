//! Router tests for the relay ingress.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sonar_common::{BatchSink, ErrorBuffer, ErrorReport};
use sonard::server::{router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Holds every batch until released
struct GatedSink {
    release: Arc<Notify>,
}

#[async_trait]
impl BatchSink for GatedSink {
    async fn deliver(&self, _batch: Vec<ErrorReport>) -> sonar_common::Result<()> {
        self.release.notified().await;
        Ok(())
    }
}

fn app(max_size: usize) -> (Router, ErrorBuffer, Arc<Notify>) {
    let release = Arc::new(Notify::new());
    let sink = Arc::new(GatedSink {
        release: release.clone(),
    });
    let buffer = ErrorBuffer::new(sink, Duration::from_secs(3600), max_size);
    (router(Arc::new(AppState::new(buffer.clone()))), buffer, release)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_valid_report_is_accepted_and_queued() {
    let (app, buffer, _release) = app(10);

    let response = app
        .clone()
        .oneshot(post_json(
            "/errors",
            &json!({"message": "TypeError: x is undefined", "source": "GET /api/todos"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await, json!({"status": "queued"}));
    assert_eq!(buffer.pending_len(), 1);

    let health = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let health = body_json(health).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["pending"], 1);
    assert_eq!(health["inFlight"], 0);
    assert_eq!(health["version"], sonar_common::VERSION);
}

#[tokio::test]
async fn test_report_without_message_is_rejected() {
    let (app, buffer, _release) = app(10);

    let response = app
        .oneshot(post_json("/errors", &json!({"stack": "at foo"})))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert_eq!(buffer.pending_len(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let (app, _buffer, _release) = app(10);
    let request = Request::builder()
        .method("POST")
        .uri("/errors")
        .header("content-type", "application/json")
        .body(Body::from("{\"message\":"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_in_flight_duplicate_is_skipped() {
    let (app, buffer, release) = app(1);
    let report = json!({"message": "panic: nil map", "source": "go-api"});

    let first = app.clone().oneshot(post_json("/errors", &report)).await.unwrap();
    assert_eq!(body_json(first).await, json!({"status": "flushed"}));
    assert_eq!(buffer.in_flight_count(), 1);

    let second = app.clone().oneshot(post_json("/errors", &report)).await.unwrap();
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    assert_eq!(
        body_json(second).await,
        json!({"status": "skipped", "skippedCount": 1})
    );

    let listed = body_json(app.oneshot(get("/in-flight")).await.unwrap()).await;
    let entries = listed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["message"], "panic: nil map");
    assert_eq!(entries[0]["skippedCount"], 1);
    assert_eq!(entries[0]["status"], "processing");

    release.notify_one();
}
