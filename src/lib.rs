pub mod appresult;
pub mod auth;
pub mod blob;
pub mod channels;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod hub;
pub mod message_log;
pub mod model;
pub mod presence;
pub mod protocol;
pub mod registry;

use std::{sync::Arc, time::Duration};

use axum::{Router, extract::FromRef};
use tower_http::cors::CorsLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use error::ChatError;
pub use hub::{Hub, HubOptions};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Arc<Hub>,
    /// WebSocket ping interval.
    pub heartbeat: Duration,
}

/// The full HTTP + WebSocket surface.
pub fn app(state: AppState, session_idle_minutes: i64) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(session_idle_minutes)));

    Router::new()
        .merge(auth::router())
        .nest("/channels", channels::router())
        .merge(channels::messages_router())
        .merge(channels::stream_router())
        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
}
