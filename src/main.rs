//! Building portal server
//!
//! Usage:
//!   cargo run --bin seed_data          # optional demo records
//!   JWT_KEY=... cargo run --bin building_portal
//!
//! Configuration comes from flags, the environment, or a `.env` file; see `config`.

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use building_portal::config::Config;
use building_portal::logging::init_tracing;
use building_portal::rest::create_router;
use building_portal::storage::Storage;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the environment may already be populated.
    dotenvy::dotenv().ok();
    let config = Config::parse();
    let _log_guard = init_tracing(config.log_format, config.log_dir.as_deref())?;

    let storage = Storage::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path))?;

    let origin = HeaderValue::from_str(&config.cors_origin)
        .with_context(|| format!("invalid CORS origin {}", config.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = create_router(storage.clone(), config.auth_settings())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        "Building portal listening on {} (env: {}, db: {})",
        addr, config.app_env, config.db_path
    );
    info!("API docs at http://{}/swagger-ui", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    storage.flush()?;
    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
