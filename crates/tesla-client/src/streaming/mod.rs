//! Live telemetry streaming
//!
//! Opens a persistent WebSocket to the streaming endpoint, subscribes to a
//! vehicle's telemetry and yields decoded [`TelemetrySnapshot`]s. When the
//! server reports an error the connection is re-established transparently.
//!
//! # Example
//!
//! ```no_run
//! use tesla_client::OwnerClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OwnerClient::new("https://owner-api.teslamotors.com")?;
//! client.tokens().set_access_token("my-access-token");
//!
//! let mut stream = client.stream(1234567890).await?;
//! let handle = stream.handle();
//!
//! while let Some(snapshot) = stream.next().await {
//!     println!("{} speed={} soc={}%", snapshot.timestamp, snapshot.speed, snapshot.soc);
//!     if snapshot.shift() == tesla_client::ShiftState::Park {
//!         handle.close();
//!     }
//! }
//!
//! if let Some(err) = stream.last_error() {
//!     eprintln!("Stream failed: {}", err);
//! }
//! # Ok(())
//! # }
//! ```

mod decoder;
mod manager;
mod stream;
mod transport;
mod types;

pub use decoder::decode_record;
pub use manager::{connect_and_subscribe, open, SessionState, SubscriptionParams};
pub use stream::{StreamHandle, TelemetryStream};
pub use transport::{Connector, Transport, WebSocketConnector, WebSocketTransport};
pub use types::{
    Handshake, InboundMessage, ShiftState, StreamError, StreamResult, TelemetrySnapshot,
    DEFAULT_BUFFER_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_FIELDS, DEFAULT_STREAMING_URL,
    MSG_ERROR, MSG_SUBSCRIBE, MSG_UPDATE,
};
