use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use thiserror::Error;

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

/// Every failure a client can observe.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("session required")]
    Unauthenticated,

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Transient backend fault, safe to retry with backoff.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ChatError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn code(&self) -> &'static str {
        use ChatError::*;
        match self {
            InvalidArgument(_) => "invalid_argument",
            NotFound(_) => "not_found",
            Unauthenticated => "unauthenticated",
            InvalidState(_) => "invalid_state",
            Unavailable(_) => "unavailable",
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<tower_sessions::session::Error> for ChatError {
    fn from(err: tower_sessions::session::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<JsonRejection> for ChatError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidArgument(rejection.body_text())
    }
}

impl From<QueryRejection> for ChatError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidArgument(rejection.body_text())
    }
}

impl From<PathRejection> for ChatError {
    fn from(rejection: PathRejection) -> Self {
        Self::InvalidArgument(rejection.body_text())
    }
}
