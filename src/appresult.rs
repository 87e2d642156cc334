use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::ChatError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub ChatError);

impl AppError {
    pub fn status(&self) -> StatusCode {
        use ChatError::*;
        match self.0 {
            InvalidArgument(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
            Unauthenticated => StatusCode::UNAUTHORIZED,
            InvalidState(_) => StatusCode::CONFLICT,
            Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({ "code": self.0.code(), "message": self.0.to_string() })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<ChatError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
