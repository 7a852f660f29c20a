use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::policy::Denial;

/// Message shown for missing resources and every policy denial, so callers
/// cannot tell an expired or exhausted resource from an unknown one.
pub const NOT_FOUND_MESSAGE: &str = "Content not found";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Missing or malformed request field
    #[error("{0}")]
    Validation(String),

    /// Resource, profile or account absent or inactive
    #[error("{0}")]
    NotFound(String),

    /// Resource exists but its usage policy refused the request
    #[error("access denied: {0}")]
    Denied(Denial),

    #[error("only the owner can modify this record")]
    NotOwner,

    /// Uniqueness conflict (slug, handle, short id); safe to retry with a new value
    #[error("{0}")]
    Conflict(String),

    #[error("invalid or expired access grant")]
    InvalidGrant,

    #[error("access grant already redeemed")]
    GrantAlreadyRedeemed,

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ServerError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ServerError::NotFound(msg.into())
    }
}

impl From<rusqlite::Error> for ServerError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref err, _) = e {
            // SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
            if err.extended_code == 2067 || err.extended_code == 1555 {
                return ServerError::Conflict("value already taken".to_string());
            }
        }
        ServerError::Database(e)
    }
}

impl From<paylink::PaylinkError> for ServerError {
    fn from(e: paylink::PaylinkError) -> Self {
        match e {
            paylink::PaylinkError::InvalidPrice(msg) => ServerError::Validation(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) | ServerError::Denied(_) => StatusCode::NOT_FOUND,
            ServerError::NotOwner => StatusCode::FORBIDDEN,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::InvalidGrant => StatusCode::UNAUTHORIZED,
            ServerError::GrantAlreadyRedeemed => StatusCode::GONE,
            ServerError::Database(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ServerError::Denied(_) => NOT_FOUND_MESSAGE.to_string(),
            ServerError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "An internal error occurred".to_string()
            }
            ServerError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({ "error": message }))
    }
}
