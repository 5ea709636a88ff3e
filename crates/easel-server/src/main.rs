//! Easel Sync Server
//!
//! Keeps the shared event log for a canvas and fans every appended event
//! out to all connected clients over server-sent events.
//!
//! ## Protocol
//!
//! ```text
//! GET  /api/canvas/sync/sse?clientId=<id>   push channel (text/event-stream)
//! POST /api/canvas/sync/event               { eventType, data } -> { seq, eventArrayLength }
//! POST /api/canvas/sync/full                { clientId, canvasJSON } -> { success }
//! GET  /api/canvas/sync/full_data           -> { canvasJSON, events, seqCounter }
//! GET  /api/canvas/sync/debug               -> { seqCounter, eventsCount, events, hasCanvasJSON, connectedClients }
//! POST /api/canvas/sync/reset
//! POST /api/canvas/sync/inject_image        { urls? } -> { success, seq, urls }
//! POST /api/upload/image                    multipart `image` -> { success, url, filename, originalName, size }
//! GET  /uploads/<filename>
//! ```

mod config;
mod error;
mod handlers;
mod state;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use config::ServerConfig;
use easel_core::sync::protocol::{
    DEBUG_PATH, EVENT_PATH, FULL_DATA_PATH, FULL_SYNC_PATH, INJECT_IMAGE_PATH, RESET_PATH, SSE_PATH,
    UPLOAD_IMAGE_PATH,
};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Room for multipart framing on top of the largest accepted file.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

fn app(state: Arc<AppState>) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    let body_limit = state.config.max_upload_bytes + BODY_LIMIT_SLACK;
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route(SSE_PATH, get(handlers::sse))
        .route(EVENT_PATH, post(handlers::push_event))
        .route(FULL_SYNC_PATH, post(handlers::full_sync))
        .route(FULL_DATA_PATH, get(handlers::full_data))
        .route(DEBUG_PATH, get(handlers::debug))
        .route(RESET_PATH, post(handlers::reset))
        .route(INJECT_IMAGE_PATH, post(handlers::inject_image))
        .route(UPLOAD_IMAGE_PATH, post(handlers::upload_image))
        .nest_service("/uploads", uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let addr = config.addr();
    info!("Uploads stored in {}", config.upload_dir.display());
    info!("Public URL: {}", config.public_url);
    let state = AppState::new(config);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Easel sync server listening on {}", addr);

    if let Err(e) = axum::serve(listener, app(state)).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
