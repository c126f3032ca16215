//! Tests for panic catching middleware setup

use super::super::{create_config_with_toml, get_body_json};
use crate::FluentRouter;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    routing::get,
};
use tower::Service;

fn panic_router() -> Router {
    Router::new()
        .route(
            "/panic",
            get(|| async {
                panic!("Test panic!");
                #[allow(unreachable_code)]
                "This will never be reached"
            }),
        )
        .route("/normal", get(|| async { "OK" }))
}

#[tokio::test]
async fn test_setup_catch_panic_with_panic() {
    let fluent_router = FluentRouter::without_state(create_config_with_toml(""))
        .unwrap()
        .merge(panic_router())
        .setup_catch_panic();

    let mut app = fluent_router.into_inner();

    let response = app
        .call(Request::builder().uri("/panic").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body = get_body_json(response).await;
    assert_eq!(body["error_code"], "INTERNAL_ERROR");
    assert_eq!(body["error"], "Internal Server Error");
}

#[tokio::test]
async fn test_setup_catch_panic_normal_request() {
    let mut app = FluentRouter::without_state(create_config_with_toml(""))
        .unwrap()
        .merge(panic_router())
        .setup_catch_panic()
        .into_inner();

    let response = app
        .call(Request::builder().uri("/normal").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_panic_message_reaches_notification_channel() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    let mut app = FluentRouter::without_state(create_config_with_toml(""))
        .unwrap()
        .with_panic_notification_channel(tx)
        .merge(panic_router())
        .setup_catch_panic()
        .into_inner();

    let response = app
        .call(Request::builder().uri("/panic").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let msg = rx.try_recv().expect("panic was reported");
    assert!(msg.contains("Test panic!"), "{msg}");
}
