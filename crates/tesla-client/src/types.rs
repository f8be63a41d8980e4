//! Envelope types shared by owner API responses

use serde::{Deserialize, Serialize};

/// Standard `{"response": ...}` wrapper used by `/api/1` endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub response: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Outcome of a vehicle command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub reason: String,
    pub result: bool,
}

/// Error body returned by the API on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
