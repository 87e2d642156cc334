use axum::{
    Router,
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    routing::post,
};
use tower_sessions::Session as CookieSession;

use crate::{AppError, AppState, error::ChatError, gateway::Session};

mod login;
mod logout;

/// Cookie-session key holding the gateway token.
pub const SESSION_TOKEN: &str = "session_token";

pub fn router() -> Router<AppState> {
    Router::new().route("/sessions", post(login::create_session).delete(logout::delete_session))
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Token from the `Authorization` header, falling back to the cookie session.
async fn find_token(parts: &mut Parts, state: &AppState) -> Result<Option<String>, AppError> {
    if let Some(token) = bearer_token(&parts.headers) {
        return Ok(Some(token.to_owned()));
    }
    let Ok(cookie) = CookieSession::from_request_parts(parts, state).await else {
        return Ok(None);
    };
    Ok(cookie.get::<String>(SESSION_TOKEN).await?)
}

/// A request made by a known session. Rejects with 401 otherwise.
pub struct Authenticated(pub Session);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = find_token(parts, state).await?.ok_or(ChatError::Unauthenticated)?;
        Ok(Self(state.hub.gateway.resolve(&token)?))
    }
}

impl OptionalFromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>, Self::Rejection> {
        match find_token(parts, state).await? {
            Some(token) => Ok(Some(Self(state.hub.gateway.resolve(&token)?))),
            None => Ok(None),
        }
    }
}
