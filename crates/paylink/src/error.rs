use thiserror::Error;

/// Errors returned by paylink protocol operations.
#[derive(Debug, Error)]
pub enum PaylinkError {
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("facilitator error: {0}")]
    Facilitator(String),

    #[error("facilitator timed out")]
    Timeout,

    #[error("http error: {0}")]
    HttpError(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl From<reqwest::Error> for PaylinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PaylinkError::Timeout
        } else {
            PaylinkError::HttpError(e.to_string())
        }
    }
}
