use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::Config;
use crate::handlers::{
    active_uploads, cancel_all, cancel_file, health_check, link_view, remove_file, select_file,
    teardown_view,
};
use crate::middleware::{add_security_headers, validate_api_key, ApiKeyHash};
use crate::state::AppState;
use crate::utils::{shutdown_signal, token_fingerprint};

/// build the status api router
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    tracing::debug!("Building status router with max upload size: {} bytes", config.max_upload_size);

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_origin(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let api = Router::new()
        .route("/uploaders/:uploader_id", get(link_view).delete(teardown_view))
        .route("/uploaders/:uploader_id/active", get(active_uploads))
        .route("/uploaders/:uploader_id/files", post(select_file))
        .route(
            "/uploaders/:uploader_id/files/:local_id",
            axum::routing::delete(remove_file),
        )
        .route("/uploaders/:uploader_id/files/:local_id/cancel", post(cancel_file))
        .route("/uploaders/:uploader_id/cancel-all", post(cancel_all))
        .layer(axum::middleware::from_fn(validate_api_key))
        .layer(Extension(ApiKeyHash(config.api_key_hash.clone())));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(axum::middleware::from_fn(add_security_headers))
        .layer(RequestBodyLimitLayer::new(config.max_upload_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// serve the status api until a shutdown signal arrives
pub async fn start_server(app: Router, addr: SocketAddr) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind status server on {}: {}", addr, e);
            return;
        }
    };
    tracing::debug!("Status listener bound to {}", addr);

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .tcp_nodelay(true);

    tracing::info!("Status server running and ready to accept connections");
    if let Err(e) = server.await {
        tracing::error!("Status server error: {}", e);
    }
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config) {
    tracing::info!("upload-tracker starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 STATUS API: http://{}:{}", config.status_host, config.status_port);
    tracing::info!("📤 UPLOADING TO: {}", config.upload_url);
    tracing::info!("🎬 MEDIA LOOKUP: {}", config.media_url);
    tracing::info!("🔑 API TOKEN: {}", token_fingerprint(&config.api_token));
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
