use thiserror::Error;

use parley_shared::{ProtocolError, ValidationError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Rejected by server: {0}")]
    BadRequest(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("No chat is open")]
    NoOpenChat,

    #[error("Relay unavailable")]
    RelayUnavailable,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Map a non-success REST response to the matching error kind.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 | 422 => ClientError::BadRequest(message),
            401 => ClientError::Unauthenticated(message),
            403 => ClientError::Forbidden(message),
            404 => ClientError::NotFound(message),
            _ => ClientError::Server { status, message },
        }
    }
}
