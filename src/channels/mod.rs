mod msg;
mod new;
mod photo;
mod ws;

use axum::{
    Router,
    routing::{get, patch, post},
};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(new::list_channels).post(new::create_channel))
        .route("/{id}/messages", get(msg::tail_messages).post(msg::post_message))
        .route("/{id}/photos", post(photo::post_photo))
}

pub fn messages_router() -> Router<AppState> {
    Router::new().route("/messages/{id}", patch(msg::resolve_photo))
}

pub fn stream_router() -> Router<AppState> {
    Router::new().route("/stream", get(ws::stream))
}
