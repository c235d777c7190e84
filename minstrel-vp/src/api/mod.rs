//! REST/SSE control surface for the voice player
//!
//! The in-process stand-in for the chat command layer: it validates inputs
//! (extension allow-list, file existence, volume range) and forwards to the
//! session registry. Directory and playlist resolution stay outside — the
//! caller posts concrete track locations.

pub mod handlers;
pub mod sse;

use crate::config::Settings;
use crate::playback::registry::SessionRegistry;
use axum::{
    routing::{get, post},
    Router,
};
use minstrel_common::events::EventBus;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub registry: Arc<SessionRegistry>,
    pub bus: EventBus,
    pub settings: Arc<Settings>,
}

/// Create the API router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Per-guild session control
        .route("/sessions/:guild_id/enqueue", post(handlers::enqueue))
        .route("/sessions/:guild_id/skip", post(handlers::skip))
        .route("/sessions/:guild_id/stop", post(handlers::stop))
        .route("/sessions/:guild_id/shuffle", post(handlers::shuffle))
        .route("/sessions/:guild_id/end", post(handlers::end_after_current))
        .route("/sessions/:guild_id/volume", post(handlers::set_volume))
        .route("/sessions/:guild_id/queue", get(handlers::get_queue))
        .route("/sessions/:guild_id/state", get(handlers::get_state))
        // SSE event stream
        .route("/events", get(sse::event_stream))
        // Attach application context
        .with_state(ctx)
        // Enable CORS for local front-ends
        .layer(CorsLayer::permissive())
}
