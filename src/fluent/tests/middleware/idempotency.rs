//! Tests for the idempotency coordinator set up through FluentRouter

use super::super::{
    create_caching_config, create_config_with_toml, create_test_router, get_body_json,
    get_request, post_json,
};
use crate::{Config, FluentRouter, HttpIdempotencyConfig, IdempotencyStore, InMemoryIdempotencyStore};
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt;

/// Counts handler executions and hands out sequential ids.
#[derive(Clone, Default)]
struct Widgets {
    created: Arc<AtomicU32>,
}

impl Widgets {
    fn count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

async fn create_widget(State(widgets): State<Widgets>, Json(body): Json<Value>) -> impl IntoResponse {
    let id = widgets.created.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::CREATED,
        Json(json!({ "id": id, "name": body["name"] })),
    )
}

async fn slow_widget(State(widgets): State<Widgets>) -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(150)).await;
    let id = widgets.created.fetch_add(1, Ordering::SeqCst) + 1;
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

fn widget_routes(widgets: &Widgets) -> Router {
    Router::new()
        .route("/api/widgets", post(create_widget))
        .route("/api/widgets/slow", post(slow_widget))
        .route(
            "/api/widgets/count",
            get(|State(w): State<Widgets>| async move { w.count().to_string() }),
        )
        .with_state(widgets.clone())
}

#[tokio::test]
async fn test_retry_with_same_key_replays_first_response() {
    let widgets = Widgets::default();
    let (app, _) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;
    let body = json!({ "name": "bolt" });

    let first = app
        .clone()
        .oneshot(post_json("/api/widgets", &body, Some("abc-123")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(first.headers()["x-idempotency-key"], "abc-123");
    assert_eq!(get_body_json(first).await, json!({ "id": 1, "name": "bolt" }));

    let second = app
        .oneshot(post_json("/api/widgets", &body, Some("abc-123")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(second.headers()["x-idempotency-key"], "abc-123");
    assert_eq!(get_body_json(second).await, json!({ "id": 1, "name": "bolt" }));

    assert_eq!(widgets.count(), 1);
}

#[tokio::test]
async fn test_derived_key_replays_identical_requests() {
    let widgets = Widgets::default();
    let (app, _) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;
    let body = json!({ "name": "nut", "size": 4 });

    let first = app
        .clone()
        .oneshot(post_json("/api/widgets", &body, None))
        .await
        .unwrap();
    let derived = first.headers()["x-idempotency-key"].clone();
    assert_eq!(derived.len(), 64, "derived keys are sha256 hex");

    // same content, different key order
    let reordered: Value = serde_json::from_str(r#"{"size":4,"name":"nut"}"#).unwrap();
    let second = app
        .oneshot(post_json("/api/widgets", &reordered, None))
        .await
        .unwrap();
    assert_eq!(second.headers()["x-idempotency-key"], derived);
    assert_eq!(get_body_json(second).await["id"], 1);
    assert_eq!(widgets.count(), 1);
}

#[tokio::test]
async fn test_different_bodies_execute_separately() {
    let widgets = Widgets::default();
    let (app, _) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;

    for name in ["a", "b"] {
        let response = app
            .clone()
            .oneshot(post_json("/api/widgets", &json!({ "name": name }), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    assert_eq!(widgets.count(), 2);
}

#[tokio::test]
async fn test_client_key_wins_over_content() {
    let widgets = Widgets::default();
    let (app, _) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;

    let first = app
        .clone()
        .oneshot(post_json("/api/widgets", &json!({ "name": "a" }), Some("same")))
        .await
        .unwrap();
    assert_eq!(get_body_json(first).await["name"], "a");

    let second = app
        .oneshot(post_json("/api/widgets", &json!({ "name": "b" }), Some("same")))
        .await
        .unwrap();
    assert_eq!(get_body_json(second).await["name"], "a");
    assert_eq!(widgets.count(), 1);
}

#[tokio::test]
async fn test_alternate_header_name_is_honored() {
    let widgets = Widgets::default();
    let (app, _) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/widgets")
                    .header("content-type", "application/json")
                    .header("X-Idempotency-Key", "alt-key")
                    .body(Body::from(r#"{"name":"x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-idempotency-key"], "alt-key");
    }
    assert_eq!(widgets.count(), 1);
}

#[tokio::test]
async fn test_missing_key_rejected_when_required() {
    let widgets = Widgets::default();
    let config = create_config_with_toml(
        r#"
[http.idempotency]
require_header = true
"#,
    );
    let (app, _) = create_test_router(config, widget_routes(&widgets)).await;

    let response = app
        .clone()
        .oneshot(post_json("/api/widgets", &json!({ "name": "a" }), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        get_body_json(response).await,
        json!({
            "error_code": "MISSING_IDEMPOTENCY_KEY",
            "error": "Idempotency-Key header required",
            "details": "Please provide an Idempotency-Key header for this request",
        })
    );
    assert_eq!(widgets.count(), 0);

    let response = app
        .oneshot(post_json("/api/widgets", &json!({ "name": "a" }), Some("k1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_blank_key_counts_as_missing() {
    let config = create_config_with_toml(
        r#"
[http.idempotency]
require_header = true
"#,
    );
    let (app, _) = create_test_router(config, widget_routes(&Widgets::default())).await;

    let response = app
        .oneshot(post_json("/api/widgets", &json!({}), Some("   ")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reads_pass_through() {
    let widgets = Widgets::default();
    let (app, store) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(get_request("/api/widgets/count"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-idempotency-key").is_none());
    }
    assert_eq!(store.unwrap().stats().size, 0);
}

#[tokio::test]
async fn test_error_responses_are_replayed_too() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let routes = Router::new().route(
        "/api/orders",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "error": "out of stock" })),
                )
            }
        }),
    );
    let (app, _) = create_test_router(create_caching_config(), routes).await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_json("/api/orders", &json!({ "sku": 7 }), Some("order-7")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(get_body_json(response).await["error"], "out of stock");
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expired_response_executes_again() {
    let widgets = Widgets::default();
    let config = Config::default().with_idempotency_config(
        HttpIdempotencyConfig::default().with_ttl(Duration::from_millis(100)),
    );
    let (app, _) = create_test_router(config, widget_routes(&widgets)).await;
    let body = json!({ "name": "short-lived" });

    let first = app
        .clone()
        .oneshot(post_json("/api/widgets", &body, Some("ttl-key")))
        .await
        .unwrap();
    assert_eq!(get_body_json(first).await["id"], 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = app
        .oneshot(post_json("/api/widgets", &body, Some("ttl-key")))
        .await
        .unwrap();
    assert_eq!(get_body_json(second).await["id"], 2);
    assert_eq!(widgets.count(), 2);
}

#[tokio::test]
async fn test_concurrent_duplicates_execute_once() {
    let widgets = Widgets::default();
    let (app, store) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;

    let requests = (0..8).map(|_| {
        let app = app.clone();
        tokio::spawn(async move {
            let response = app
                .oneshot(post_json("/api/widgets/slow", &json!({}), Some("burst")))
                .await
                .unwrap();
            (response.status(), get_body_json(response).await)
        })
    });

    let mut results = Vec::new();
    for handle in requests.collect::<Vec<_>>() {
        results.push(handle.await.unwrap());
    }

    assert_eq!(widgets.count(), 1);
    for (status, body) in results {
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "id": 1 }));
    }
    let stats = store.unwrap().stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.size, 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_with_derived_key_execute_once() {
    let widgets = Widgets::default();
    let (app, store) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;
    let body = json!({ "name": "burst", "tags": ["a", "b"] });

    let requests = (0..8).map(|_| {
        let app = app.clone();
        let body = body.clone();
        tokio::spawn(async move {
            let response = app
                .oneshot(post_json("/api/widgets/slow", &body, None))
                .await
                .unwrap();
            let key = response.headers()["x-idempotency-key"].clone();
            (response.status(), key, get_body_json(response).await)
        })
    });

    let mut results = Vec::new();
    for handle in requests.collect::<Vec<_>>() {
        results.push(handle.await.unwrap());
    }

    assert_eq!(widgets.count(), 1);
    let first_key = results[0].1.clone();
    assert_eq!(first_key.len(), 64);
    for (status, key, body) in results {
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(key, first_key);
        assert_eq!(body, json!({ "id": 1 }));
    }
    let stats = store.unwrap().stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.size, 1);
}

#[tokio::test]
async fn test_stats_route_reports_counts_only() {
    let widgets = Widgets::default();
    let (app, _) = create_test_router(create_caching_config(), widget_routes(&widgets)).await;

    let response = app
        .clone()
        .oneshot(post_json("/api/widgets", &json!({ "name": "s" }), Some("secret-key")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(get_request("/api/idempotency/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = get_body_json(response).await;
    assert_eq!(stats, json!({ "size": 1, "active_keys": 1, "in_flight": 0 }));
    assert!(!stats.to_string().contains("secret-key"));
}

#[tokio::test]
async fn test_injected_store_is_used() {
    let store: Arc<dyn IdempotencyStore> = Arc::new(InMemoryIdempotencyStore::new(16));
    let widgets = Widgets::default();
    let router = FluentRouter::without_state(create_caching_config())
        .unwrap()
        .with_idempotency_store(store.clone())
        .merge(widget_routes(&widgets))
        .setup_middleware()
        .await
        .unwrap();

    let response = router
        .into_inner()
        .oneshot(post_json("/api/widgets", &json!({}), Some("injected")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(store.stats().size, 1);
}

#[tokio::test]
async fn test_clear_cache_allows_reexecution() {
    let widgets = Widgets::default();
    let mut router = FluentRouter::without_state(create_caching_config())
        .unwrap()
        .merge(widget_routes(&widgets))
        .setup_middleware()
        .await
        .unwrap();
    router.stop_idempotency_sweeper();

    let app = router.inner.clone();
    let body = json!({ "name": "c" });
    app.clone()
        .oneshot(post_json("/api/widgets", &body, Some("clear-me")))
        .await
        .unwrap();
    assert_eq!(router.idempotency_stats().unwrap().size, 1);

    router.clear_idempotency_cache();
    assert_eq!(router.idempotency_stats().unwrap().size, 0);

    let response = app
        .oneshot(post_json("/api/widgets", &body, Some("clear-me")))
        .await
        .unwrap();
    assert_eq!(get_body_json(response).await["id"], 2);
}

#[tokio::test]
async fn test_excluded_coordinator_runs_every_request() {
    let widgets = Widgets::default();
    let config =
        create_caching_config().with_excluded_middlewares(vec![crate::HttpMiddleware::Idempotency]);
    let (app, store) = create_test_router(config, widget_routes(&widgets)).await;
    assert!(store.is_none());

    for _ in 0..2 {
        app.clone()
            .oneshot(post_json("/api/widgets", &json!({}), Some("k")))
            .await
            .unwrap();
    }
    assert_eq!(widgets.count(), 2);
}
