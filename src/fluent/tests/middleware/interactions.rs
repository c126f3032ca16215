//! Tests for middleware working together in the full stack

use super::super::{
    create_caching_config, create_test_router, get_body_json, get_body_string, get_request,
    post_json,
};
use crate::{FluentRouter, HttpIdempotencyConfig};
use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode, header},
    routing::{get, post},
};
use serde_json::json;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt;

#[tokio::test]
async fn test_panicking_handler_leaves_no_marker() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let routes = Router::new().route(
        "/api/flaky",
        post(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first attempt fails");
                }
                (StatusCode::CREATED, Json(json!({ "ok": true })))
            }
        }),
    );
    let (app, store) = create_test_router(create_caching_config(), routes).await;
    let store = store.unwrap();

    let response = app
        .clone()
        .oneshot(post_json("/api/flaky", &json!({}), Some("flaky")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(get_body_json(response).await["error_code"], "INTERNAL_ERROR");
    assert_eq!(store.stats().in_flight, 0);
    assert_eq!(store.stats().size, 0);

    let response = app
        .oneshot(post_json("/api/flaky", &json!({}), Some("flaky")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_timed_out_request_leaves_no_marker() {
    let config = create_caching_config().with_request_timeout(Duration::from_millis(50));
    let routes = Router::new().route(
        "/api/slow",
        post(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "late"
        }),
    );
    let (app, store) = create_test_router(config, routes).await;
    let store = store.unwrap();

    let response = app
        .oneshot(post_json("/api/slow", &json!({}), Some("slow")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(store.stats().in_flight, 0);
    assert_eq!(store.stats().size, 0);
}

#[tokio::test]
async fn test_writes_are_not_tagged_and_reads_are_not_coordinated() {
    let routes = Router::new().route(
        "/api/things",
        get(|| async { Json(json!(["a"])) }).post(|| async { Json(json!({ "id": 1 })) }),
    );
    let (app, store) = create_test_router(create_caching_config(), routes).await;

    let write = app
        .clone()
        .oneshot(post_json("/api/things", &json!({}), Some("w")))
        .await
        .unwrap();
    assert!(write.headers().contains_key("x-idempotency-key"));
    assert!(!write.headers().contains_key(header::ETAG));

    let read = app.oneshot(get_request("/api/things")).await.unwrap();
    assert!(read.headers().contains_key(header::ETAG));
    assert!(!read.headers().contains_key("x-idempotency-key"));
    assert_eq!(store.unwrap().stats().size, 1);
}

#[tokio::test]
async fn test_coordinator_body_limit_applies_before_key_derivation() {
    let config = create_caching_config().with_idempotency_config(
        HttpIdempotencyConfig::default().with_max_body_bytes(64),
    );
    let routes = Router::new().route("/api/upload", post(|body: String| async move { body }));
    let (app, store) = create_test_router(config, routes).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/upload")
                .body(Body::from("x".repeat(128)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(get_body_json(response).await["error_code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(store.unwrap().stats().size, 0);
}

#[tokio::test]
async fn test_replay_carries_request_id_of_the_retry() {
    let routes = Router::new().route("/api/ping", post(|| async { "pong" }));
    let (app, _) = create_test_router(create_caching_config(), routes).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_json("/api/ping", &json!({}), Some("rid")))
            .await
            .unwrap();
        ids.push(response.headers()["x-request-id"].clone());
        assert_eq!(get_body_string(response).await, "pong");
    }
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_probes_bypass_the_coordinator() {
    let router = FluentRouter::without_state(create_caching_config())
        .unwrap()
        .setup_middleware()
        .await
        .unwrap();
    let store = router.idempotency_store().unwrap();
    let app = router.into_inner();

    let response = app.oneshot(get_request("/live")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.stats().size, 0);
}
