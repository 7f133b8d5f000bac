use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use livechan_server::{
    config::Config,
    feed::FeedRegistry,
    handlers::{self, GatewayState},
    open_post::{MAX_BODY_CHARS, MAX_LIFETIME_SECS, MAX_LINE_COUNT},
    post_store::{HttpPostStore, PostStore},
    spam::SpamScorer,
    sweeper,
};
use livechan_proto::ConfigsPayload;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livechan_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Livechan Gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Post store: {}", config.post_store_url);
    info!("CORS origins: {:?}", config.cors_origins);

    let post_store: Arc<dyn PostStore> = match HttpPostStore::new(
        config.post_store_url.clone(),
        Duration::from_secs(config.post_store_timeout_secs),
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to build post store client: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(FeedRegistry::new(
        config.max_connections_per_addr,
        Duration::from_millis(config.flush_interval_ms),
    ));
    let spam = Arc::new(SpamScorer::new(config.spam_captcha_threshold));

    let state = GatewayState {
        registry,
        spam: spam.clone(),
        post_store,
        limits: ConfigsPayload {
            max_body_chars: MAX_BODY_CHARS,
            max_lines: MAX_LINE_COUNT,
            post_lifetime_secs: MAX_LIFETIME_SECS,
        },
    };

    // Start the idle/expiry sweeper
    sweeper::spawn(
        state.clone(),
        Duration::from_secs(config.sweep_interval_secs),
        config.feed_idle_secs,
    );

    // Start the spam score cleanup task
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            spam.cleanup();
        }
    });

    // Build CORS layer
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET])
        .allow_origin(AllowOrigin::list(origins));

    let app = handlers::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Gateway listening on http://{}", addr);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
