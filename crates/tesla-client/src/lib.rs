//! Owner API Client Library
//!
//! Provides an authenticated HTTP client for the vehicle owner API and a live
//! telemetry stream over a persistent WebSocket.
//!
//! # Example
//!
//! ```rust,no_run
//! use tesla_client::OwnerClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OwnerClient::with_access_token("https://owner-api.teslamotors.com", "token")?;
//!
//!     // Remote command
//!     client.command::<()>(1234567890, "honk_horn", None).await?;
//!
//!     // Live telemetry
//!     let mut stream = client.stream(1234567890).await?;
//!     while let Some(snapshot) = stream.next().await {
//!         println!("{:?}", snapshot);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides an axum-backed [`testing::TestServer`], a
//! scripted WebSocket [`testing::MockStreamingServer`], and an in-memory
//! [`testing::MockConnector`] for exercising reconnect behavior.

mod auth;
mod client;
mod error;
pub mod streaming;
pub mod testing;
mod types;

pub use auth::{TokenProvider, TokenStore, Tokens};
pub use client::{ClientConfig, OwnerClient, DEFAULT_BASE_URL};
pub use error::{OwnerClientError, Result};
pub use types::*;

// Re-export streaming types for convenience
pub use streaming::{ShiftState, StreamError, StreamHandle, TelemetrySnapshot, TelemetryStream};
