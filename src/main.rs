use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dedupvault::config::Config;
use dedupvault::db::Database;
use dedupvault::services::RateLimiter;
use dedupvault::storage::{BlobStore, LocalStorage, UrlSigner};
use dedupvault::{handlers, middleware, AppState};

/// Headroom for multipart framing on top of the largest accepted file
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dedupvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DedupVault...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let signer = Arc::new(UrlSigner::new(
        &config.storage.url_secret,
        config.server.public_base_url.clone(),
    ));
    let store: Arc<dyn BlobStore> = Arc::new(LocalStorage::new(
        config.storage.local_path.clone(),
        signer.as_ref().clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    spawn_rate_limit_sweeper(
        rate_limiter.clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_seconds.max(1)),
    );

    // Create app state
    let state = AppState {
        db,
        config: config.clone(),
        store,
        signer,
        rate_limiter,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn spawn_rate_limit_sweeper(limiter: Arc<RateLimiter>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            limiter.sweep();
            tracing::debug!(tracked = limiter.tracked_keys(), "Swept rate limiter");
        }
    });
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = usize::try_from(state.config.storage.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    // Public routes (no owner header)
    let public_routes = Router::new()
        .route("/public/share/:token", get(handlers::share::get_public_share))
        .route(
            "/public/share/:token/download",
            get(handlers::share::download_public_share),
        )
        .route("/blobs/*key", get(handlers::blob::get_signed_blob));

    // Owner routes
    let owner_routes = Router::new()
        // Files
        .route("/files", get(handlers::file::list_files))
        .route(
            "/files/upload",
            post(handlers::file::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/files/:id",
            get(handlers::file::get_file)
                .patch(handlers::file::rename_file)
                .delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        .route("/files/:id/url", get(handlers::file::get_retrieval_url))
        .route("/quota", get(handlers::file::get_quota))
        // Shares
        .route("/shares", post(handlers::share::create_share))
        .route("/shares/my", get(handlers::share::list_my_shares))
        .route(
            "/shares/:id",
            axum::routing::patch(handlers::share::update_share)
                .delete(handlers::share::delete_share),
        )
        .route("/shares/:id/events", get(handlers::share::list_share_events))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::owner::owner_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", public_routes.merge(owner_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
