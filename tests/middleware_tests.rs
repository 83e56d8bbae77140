use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;
use tower::util::ServiceExt;

use upload_tracker::config::Config;
use upload_tracker::middleware::{add_security_headers, validate_api_key, ApiKeyHash, API_KEY_HEADER};

#[tokio::test]
async fn test_add_security_headers() {
    let app = Router::new()
        .route("/", get(|| async { "hello" }))
        .layer(from_fn(add_security_headers));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("cache-control").unwrap(), "no-store");
}

#[tokio::test]
async fn test_validate_api_key() {
    let correct_key = "secret";

    let app = Router::new()
        .route("/", get(|| async { "hello" }))
        .layer(from_fn(validate_api_key))
        .layer(axum::Extension(ApiKeyHash(Config::hash_api_key(correct_key))));

    // Test missing header
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Test wrong key
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header(API_KEY_HEADER, "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Test correct key
    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header(API_KEY_HEADER, correct_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_validate_api_key_without_extension() {
    let app = Router::new()
        .route("/", get(|| async { "hello" }))
        .layer(from_fn(validate_api_key));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header(API_KEY_HEADER, "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
