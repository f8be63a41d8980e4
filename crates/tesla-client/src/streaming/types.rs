//! Types for telemetry streaming

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Default streaming endpoint
pub const DEFAULT_STREAMING_URL: &str = "wss://streaming.vn.teslamotors.com/streaming/";

/// Default number of snapshots buffered between the connection task and the consumer
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;

/// Default timeout for opening the socket
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Telemetry fields requested in the subscription handshake, in record order
/// (the timestamp is always sent first and is not listed).
pub const DEFAULT_FIELDS: &[&str] = &[
    "speed",
    "odometer",
    "soc",
    "elevation",
    "est_heading",
    "est_lat",
    "est_lng",
    "power",
    "shift_state",
    "range",
    "est_range",
    "heading",
];

/// Handshake message type
pub const MSG_SUBSCRIBE: &str = "data:subscribe_oauth";
/// Inbound update frame
pub const MSG_UPDATE: &str = "data:update";
/// Inbound error frame
pub const MSG_ERROR: &str = "data:error";

/// One vehicle sample decoded from an update frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Capture time (millisecond precision)
    pub timestamp: DateTime<Utc>,
    /// Speed in the account's unit of measure
    pub speed: i32,
    pub odometer: f64,
    /// State of charge, percent
    pub soc: i32,
    pub elevation: i32,
    /// Heading estimate, degrees
    pub est_heading: i32,
    pub est_lat: f64,
    pub est_lng: f64,
    /// Power in kW (negative while regenerating or charging)
    pub power: i32,
    /// Raw shift-state code, see [`ShiftState`]
    pub shift_state: i32,
    pub range: i32,
    pub est_range: i32,
    /// Heading, degrees
    pub heading: i32,
}

impl TelemetrySnapshot {
    /// Typed view of the shift-state code
    pub fn shift(&self) -> ShiftState {
        ShiftState::from_code(self.shift_state)
    }
}

/// Gear selector position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftState {
    Park,
    Reverse,
    Drive,
    Neutral,
    Unknown,
}

impl ShiftState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Park,
            1 => Self::Reverse,
            2 => Self::Drive,
            3 => Self::Neutral,
            _ => Self::Unknown,
        }
    }

    /// Single-letter form shown on the instrument cluster
    pub fn as_letter(&self) -> &'static str {
        match self {
            Self::Park => "P",
            Self::Reverse => "R",
            Self::Drive => "D",
            Self::Neutral => "N",
            Self::Unknown => "-",
        }
    }
}

impl fmt::Display for ShiftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_letter())
    }
}

/// Subscription handshake sent after every (re)connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub msg_type: String,
    pub token: String,
    /// Comma-joined list of requested fields
    pub value: String,
    /// Vehicle identifier as a decimal string
    pub tag: String,
}

impl Handshake {
    pub fn subscribe(token: String, vehicle_id: u64, fields: &[String]) -> Self {
        Self {
            msg_type: MSG_SUBSCRIBE.to_string(),
            token,
            value: fields.join(","),
            tag: vehicle_id.to_string(),
        }
    }
}

/// Message pushed by the streaming server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub msg_type: String,
    /// Positional record for updates, human-readable text for errors
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub tag: Option<String>,
    /// Server fault class on error frames (e.g. "vehicle_disconnected")
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_type: Option<String>,
}

/// Accept any JSON scalar for an optional text field; non-strings are kept
/// in their JSON rendering so `msg_type` is never lost to a mistyped field.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl InboundMessage {
    pub fn update(value: impl Into<String>) -> Self {
        Self {
            msg_type: MSG_UPDATE.to_string(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn error(error_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            msg_type: MSG_ERROR.to_string(),
            value: Some(value.into()),
            error_type: Some(error_type.into()),
            ..Default::default()
        }
    }
}

/// Errors that can occur while opening or running a telemetry stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Opening the socket did not complete in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// No bearer token is available for the handshake
    #[error("Missing access token, authenticate first")]
    MissingAccessToken,

    /// Failed to encode an outbound message
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport-level failure not covered by the WebSocket variant
    #[error("Transport error: {0}")]
    Transport(String),

    /// Re-establishing the stream after a server fault failed
    #[error("Reconnect failed: {0}")]
    Reconnect(#[source] Box<StreamError>),
}

/// Result type for streaming operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;
