use std::sync::Arc;

use axum::{debug_handler, extract::State};
use serde::Deserialize;
use tower_sessions::Session as CookieSession;
use tracing::info;

use crate::{AppResult, AppState, extract::Json, gateway::Session, hub::Hub};

use super::SESSION_TOKEN;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewSessionBody {
    #[serde(default)]
    display_name: String,
}

/// Anonymous sign-in. The token is returned and also kept in the cookie
/// session for browser clients.
#[debug_handler(state = AppState)]
pub(crate) async fn create_session(
    State(hub): State<Arc<Hub>>,
    cookie: CookieSession,

    Json(NewSessionBody { display_name }): Json<NewSessionBody>,
) -> AppResult<Json<Session>> {
    let session = hub.gateway.authenticate(&display_name)?;
    cookie.insert(SESSION_TOKEN, &session.session_token).await?;

    info!(user_id = %session.user_id, "welcome");
    Ok(Json(session))
}
