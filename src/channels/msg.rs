use std::sync::Arc;

use axum::{debug_handler, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::{
    AppResult, AppState,
    auth::Authenticated,
    error::ChatError,
    extract::{Json, Path, Query},
    hub::Hub,
    model::{Message, MessageBody},
};

#[derive(Debug, Deserialize)]
pub(crate) struct TailQuery {
    limit: Option<usize>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn tail_messages(
    State(hub): State<Arc<Hub>>,
    Authenticated(_): Authenticated,
    Path(channel_id): Path<String>,
    Query(TailQuery { limit }): Query<TailQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let limit = limit.unwrap_or(hub.options.default_tail);
    Ok(Json(hub.log.tail(&channel_id, limit).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostMessageBody {
    sender_id: Option<String>,
    sender_name: Option<String>,
    body: Option<MessageBody>,
    request_id: Option<String>,
}

/// The sender is always the calling session; a `senderId` in the body only
/// has to agree with it.
#[debug_handler(state = AppState)]
pub(crate) async fn post_message(
    State(hub): State<Arc<Hub>>,
    Authenticated(session): Authenticated,
    Path(channel_id): Path<String>,

    Json(PostMessageBody { sender_id, sender_name, body, request_id }): Json<PostMessageBody>,
) -> AppResult<(StatusCode, Json<Message>)> {
    if sender_id.is_some_and(|id| id != session.user_id) {
        return Err(ChatError::invalid("senderId does not match the session").into());
    }
    let body = body.ok_or_else(|| ChatError::invalid("body is required"))?;
    let sender_name = sender_name.unwrap_or(session.display_name);

    let message = hub
        .log
        .append(&channel_id, &session.user_id, &sender_name, body, request_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolvePhotoBody {
    #[serde(rename = "photoURL", default)]
    photo_url: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn resolve_photo(
    State(hub): State<Arc<Hub>>,
    Authenticated(_): Authenticated,
    Path(message_id): Path<String>,

    Json(ResolvePhotoBody { photo_url }): Json<ResolvePhotoBody>,
) -> AppResult<Json<Message>> {
    Ok(Json(hub.log.resolve_photo(&message_id, &photo_url).await?))
}
