use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::sync::Arc;

use upload_tracker::config::Config;
use upload_tracker::media::MediaClient;
use upload_tracker::reconciler::UploadService;
use upload_tracker::server::{build_router, print_startup_banner, start_server};
use upload_tracker::state::AppState;
use upload_tracker::transport::HttpTransport;

// use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        let http = reqwest::Client::new();

        // transport events flow through one channel into one event loop
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = Arc::new(HttpTransport::new(http.clone(), events_tx, config.chunk_size));
        let service = Arc::new(UploadService::new(transport));

        let runner = Arc::clone(&service);
        tokio::spawn(async move { runner.run(events_rx).await });

        let media = MediaClient::new(http, config.media_url.clone(), config.api_token.clone())
            .with_poll_interval(config.media_poll_interval)
            .with_max_attempts(config.media_poll_max_attempts);

        let state = Arc::new(
            AppState::new(service, config.upload_url.clone())
                .with_form_data(config.upload_form_data())
                .with_media(Arc::new(media)),
        );

        let app = build_router(state, &config);

        let addr = SocketAddr::from((
            config.status_host.parse::<std::net::IpAddr>()
                .expect("Invalid STATUS_HOST"),
            config.status_port,
        ));

        print_startup_banner(&config);
        start_server(app, addr).await;
    });
}
