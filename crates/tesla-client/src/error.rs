//! Error types for owner API client operations

use thiserror::Error;

use crate::streaming::StreamError;

/// Result type alias for owner API client operations
pub type Result<T> = std::result::Result<T, OwnerClientError>;

/// Errors that can occur during owner API client operations
#[derive(Error, Debug)]
pub enum OwnerClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Server returned a non-success status
    #[error("HTTP status error {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Failed to encode the request or parse the response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// An API call needing a bearer token was made before one was set
    #[error("Missing access token, authenticate first")]
    MissingAccessToken,

    /// The vehicle rejected a command
    #[error("Error executing command: {0}")]
    CommandFailed(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Opening the telemetry stream failed
    #[error("Stream error: {0}")]
    StreamError(#[from] StreamError),
}

impl OwnerClientError {
    /// Create a status error from status code and message
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            message: message.into(),
        }
    }

    /// HTTP status code, if this error came from a non-success response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
