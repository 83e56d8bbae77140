use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::Config;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// sha256 hex of the accepted api key, installed as a request extension
#[derive(Debug, Clone)]
pub struct ApiKeyHash(pub String);

// reject requests whose api key does not hash to the configured one
pub async fn validate_api_key(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let expected = req
        .extensions()
        .get::<ApiKeyHash>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing {} header on {}", API_KEY_HEADER, req.uri().path());
            StatusCode::UNAUTHORIZED
        })?;

    if Config::hash_api_key(provided) != expected.0 {
        tracing::warn!("🚫 Invalid api key for {}", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}

/// upload state is live data: never cache it, never sniff it
pub async fn add_security_headers(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}
