mod config;
mod db;
mod error;
mod handlers;
mod lease;
mod models;
mod services;
mod storage;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::services::{GeminiGenerator, Lifecycle};
use crate::storage::BlobStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub lifecycle: Lifecycle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "instabytes=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting instabytes...");

    // Load configuration; this also creates the upload and data directories
    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Wire the lifecycle coordinator to its stores
    let blobs = Arc::new(BlobStore::new(&config.storage.upload_dir));
    let generator = Arc::new(GeminiGenerator::new(&config.generator)?);
    let lifecycle = Lifecycle::new(db.clone(), blobs, generator);

    let state = AppState { db, lifecycle };

    let app = create_router(state, &config);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router(state: AppState, config: &Config) -> Router {
    // CORS configuration
    let origins: Vec<HeaderValue> = config
        .cors
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route(
            "/posts",
            get(handlers::post::list_posts).post(handlers::post::create_post),
        )
        .route("/posts/:id", delete(handlers::post::delete_post))
        .route("/upload", post(handlers::post::upload_image))
        .route("/upload/:id", put(handlers::post::regenerate_description))
        // Images are served straight from the upload directory
        .nest_service("/uploads", ServeDir::new(&config.storage.upload_dir))
        // The image cap is 2 MiB; leave headroom for multipart framing
        .layer(DefaultBodyLimit::max(3 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
