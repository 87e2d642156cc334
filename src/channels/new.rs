use std::sync::Arc;

use axum::{debug_handler, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::{AppResult, AppState, auth::Authenticated, extract::Json, hub::Hub, model::Channel};

#[derive(Debug, Deserialize)]
pub(crate) struct NewChannelBody {
    #[serde(default)]
    name: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create_channel(
    State(hub): State<Arc<Hub>>,
    Authenticated(_): Authenticated,

    Json(NewChannelBody { name }): Json<NewChannelBody>,
) -> AppResult<(StatusCode, Json<Channel>)> {
    let channel = hub.registry.create(&name).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_channels(
    State(hub): State<Arc<Hub>>,
    Authenticated(_): Authenticated,
) -> AppResult<Json<Vec<Channel>>> {
    Ok(Json(hub.registry.list()))
}
