//! Tests for ETag tagging set up through FluentRouter

use super::super::{
    create_caching_config, create_config_with_toml, create_test_router, get_body_string,
    get_request,
};
use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower::ServiceExt;

fn company_routes() -> Router {
    Router::new()
        .route(
            "/api/companies",
            get(|| async { Json(json!([{ "_id": "1", "name": "Acme", "status": "active" }])) }),
        )
        .route(
            "/api/missing",
            get(|| async { (StatusCode::NOT_FOUND, Json(json!({ "error": "nope" }))) }),
        )
        .route(
            "/logo.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G']) }),
        )
        .route(
            "/raw",
            get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "plain").into_response() }),
        )
}

fn conditional(uri: &str, if_none_match: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::IF_NONE_MATCH, if_none_match)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_json_response_is_tagged() {
    let (app, _) = create_test_router(create_caching_config(), company_routes()).await;
    let response = app.oneshot(get_request("/api/companies")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let etag = response.headers()[header::ETAG].to_str().unwrap().to_owned();
    assert!(etag.starts_with("W/\"") && etag.ends_with('"'));
    assert_eq!(etag.len(), 16 + 4);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "private, no-cache");
    assert!(get_body_string(response).await.contains("Acme"));
}

#[tokio::test]
async fn test_matching_validator_gets_not_modified() {
    let (app, _) = create_test_router(create_caching_config(), company_routes()).await;
    let first = app.clone().oneshot(get_request("/api/companies")).await.unwrap();
    let etag = first.headers()[header::ETAG].to_str().unwrap().to_owned();

    let second = app
        .oneshot(conditional("/api/companies", &etag))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers()[header::ETAG], etag.as_str());
    assert_eq!(second.headers()[header::CACHE_CONTROL], "private, no-cache");
    assert!(get_body_string(second).await.is_empty());
}

#[tokio::test]
async fn test_stale_validator_gets_full_body() {
    let (app, _) = create_test_router(create_caching_config(), company_routes()).await;
    let response = app
        .oneshot(conditional("/api/companies", r#"W/"0000000000000000""#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::ETAG));
    assert!(get_body_string(response).await.contains("Acme"));
}

#[tokio::test]
async fn test_validator_list_and_wildcard_match() {
    let (app, _) = create_test_router(create_caching_config(), company_routes()).await;
    let first = app.clone().oneshot(get_request("/api/companies")).await.unwrap();
    let etag = first.headers()[header::ETAG].to_str().unwrap().to_owned();

    let list = format!(r#"W/"ffffffffffffffff", {etag}"#);
    let response = app.clone().oneshot(conditional("/api/companies", &list)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let response = app.oneshot(conditional("/api/companies", "*")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_only_successful_text_or_json_is_tagged() {
    let (app, _) = create_test_router(create_caching_config(), company_routes()).await;

    let missing = app.clone().oneshot(get_request("/api/missing")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert!(!missing.headers().contains_key(header::ETAG));

    let image = app.clone().oneshot(get_request("/logo.png")).await.unwrap();
    assert!(!image.headers().contains_key(header::ETAG));

    let text = app.oneshot(get_request("/raw")).await.unwrap();
    assert!(text.headers().contains_key(header::ETAG));
}

#[tokio::test]
async fn test_tag_length_and_cache_control_are_configurable() {
    let config = create_config_with_toml(
        r#"
[http.etag]
cache_control = "no-store"
tag_length = 8
"#,
    );
    let (app, _) = create_test_router(config, company_routes()).await;
    let response = app.oneshot(get_request("/api/companies")).await.unwrap();

    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(response.headers()[header::ETAG].len(), 8 + 4);
}

#[tokio::test]
async fn test_no_tags_without_config_section() {
    let (app, _) = create_test_router(create_config_with_toml(""), company_routes()).await;
    let response = app.oneshot(get_request("/api/companies")).await.unwrap();
    assert!(!response.headers().contains_key(header::ETAG));
}
