use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::ValidationError;
use parley_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Too many connections")]
    Overloaded,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("record not found".into()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Validation(_) | ServerError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::Overloaded => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
