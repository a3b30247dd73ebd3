use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Request-scoped error kinds shared by the REST handlers and the realtime
/// command path, so both entry points map failures identically. Every
/// variant is recoverable by the caller; none is fatal to the process.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing input. 400.
    #[error("{0}")]
    Validation(String),

    /// Referenced exchange/skill/message doesn't exist. 404.
    #[error("{0}")]
    NotFound(String),

    /// Caller is not a participant or not authorized for the transition. 403.
    #[error("{0}")]
    Forbidden(String),

    /// Uniqueness clash (duplicate exchange). 409.
    #[error("{0}")]
    Conflict(String),

    /// Invalid state transition (responding to a resolved request,
    /// completing a non-accepted exchange, chatting before acceptance). 400.
    #[error("{0}")]
    InvalidState(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidState(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Never leak internal error details to the caller.
            Self::Internal(err) => {
                error!("internal error: {err:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({ "success": false, "message": message }));
        (self.status(), body).into_response()
    }
}
