//! Error types for the local inference client.

use thiserror::Error;

/// Errors that can occur when talking to a local inference server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The base URL could not be parsed or joined
    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP request failed (connection refused, timeout, ...)
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Server returned an error response
    #[error("Server error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Whether the server could not be reached at all.
    pub fn is_connect(&self) -> bool {
        match self {
            ClientError::HttpError(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Whether the request ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::HttpError(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Whether the server reported that the requested model does not exist.
    pub fn is_model_missing(&self) -> bool {
        matches!(self, ClientError::ApiError { status: 404, .. })
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::ParseError(err.to_string())
    }
}
