use std::sync::Arc;

use axum::{debug_handler, extract::State, http::StatusCode};
use tower_sessions::Session as CookieSession;

use crate::{AppResult, AppState, hub::Hub};

use super::Authenticated;

#[debug_handler(state = AppState)]
pub(crate) async fn delete_session(
    State(hub): State<Arc<Hub>>,
    Authenticated(session): Authenticated,
    cookie: CookieSession,
) -> AppResult<StatusCode> {
    hub.gateway.revoke(&session.session_token);
    cookie.clear().await;
    Ok(StatusCode::NO_CONTENT)
}
