use std::sync::Arc;

use axum::{
    debug_handler,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
};

use crate::{
    AppResult, AppState,
    auth::Authenticated,
    extract::{Json, Path},
    hub::Hub,
    model::Message,
};

/// Raw image bytes in, placeholder message out. The URL arrives later as a
/// `messageUpdated` event.
#[debug_handler(state = AppState)]
pub(crate) async fn post_photo(
    State(hub): State<Arc<Hub>>,
    Authenticated(session): Authenticated,
    Path(channel_id): Path<String>,
    headers: HeaderMap,

    bytes: Bytes,
) -> AppResult<(StatusCode, Json<Message>)> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let placeholder = hub
        .post_photo(&channel_id, &session.user_id, &session.display_name, bytes.to_vec(), content_type)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(placeholder)))
}
