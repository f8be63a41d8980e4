//! Connection manager for the telemetry stream
//!
//! Owns the socket for one subscription and runs it as a small state machine:
//!
//! ```text
//!   Connecting ──ok──▶ Streaming ──close requested──▶ Terminated
//!       ▲                  │
//!       └──error frame─────┘   (reconnect failure ──▶ Terminated)
//! ```
//!
//! The initial connect happens in [`open`], so a handshake failure is
//! returned to the caller. Everything after that runs on a background task
//! and is reported only through the stream's error slot.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::auth::TokenProvider;

use super::decoder::decode_record;
use super::stream::{StreamShared, TelemetryStream};
use super::transport::{Connector, Transport};
use super::types::{
    Handshake, InboundMessage, StreamError, StreamResult, TelemetrySnapshot, MSG_ERROR,
    MSG_UPDATE,
};

/// What to subscribe to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionParams {
    pub vehicle_id: u64,
    pub fields: Vec<String>,
}

impl SubscriptionParams {
    pub fn new(vehicle_id: u64, fields: Vec<String>) -> Self {
        Self { vehicle_id, fields }
    }

    /// Subscribe to [`DEFAULT_FIELDS`](super::types::DEFAULT_FIELDS)
    pub fn with_default_fields(vehicle_id: u64) -> Self {
        Self::new(
            vehicle_id,
            super::types::DEFAULT_FIELDS
                .iter()
                .map(|f| f.to_string())
                .collect(),
        )
    }
}

/// Lifecycle state of a connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the socket and sending the handshake
    Connecting,
    /// Reading update frames
    Streaming,
    /// Done; the buffer has been released
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Streaming => write!(f, "STREAMING"),
            Self::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Open a socket and send the subscription handshake.
///
/// The token is read fresh on every call so reconnects use a refreshed one.
pub async fn connect_and_subscribe(
    connector: &dyn Connector,
    tokens: &dyn TokenProvider,
    params: &SubscriptionParams,
) -> StreamResult<Box<dyn Transport>> {
    let token = tokens
        .access_token()
        .ok_or(StreamError::MissingAccessToken)?;
    let handshake = serde_json::to_string(&Handshake::subscribe(
        token,
        params.vehicle_id,
        &params.fields,
    ))?;

    let mut transport = connector.connect().await?;
    if let Err(e) = transport.send(handshake).await {
        transport.close().await;
        return Err(e);
    }

    debug!(vehicle_id = params.vehicle_id, "Sent subscription handshake");
    Ok(transport)
}

/// Open a telemetry stream.
///
/// Connects and subscribes before returning; a failure here is the only one
/// the caller observes directly. On success a background task owns the
/// socket until the stream is closed or fails.
pub async fn open(
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    params: SubscriptionParams,
    buffer_capacity: usize,
) -> StreamResult<TelemetryStream> {
    let transport = connect_and_subscribe(connector.as_ref(), tokens.as_ref(), &params).await?;

    let (tx, rx) = mpsc::channel(buffer_capacity.max(1));
    let shared = Arc::new(StreamShared::default());

    let session = ConnectionSession {
        connector,
        tokens,
        params,
        data: tx,
        shared: shared.clone(),
        state: SessionState::Streaming,
        reconnects: 0,
    };
    tokio::spawn(session.run(transport));

    Ok(TelemetryStream::new(rx, shared))
}

/// Background half of a stream: one subscription and its socket
struct ConnectionSession {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    params: SubscriptionParams,
    data: mpsc::Sender<TelemetrySnapshot>,
    shared: Arc<StreamShared>,
    state: SessionState,
    reconnects: u64,
}

impl ConnectionSession {
    async fn run(mut self, transport: Box<dyn Transport>) {
        let mut transport = Some(transport);

        loop {
            if self.state != SessionState::Terminated && self.shared.is_closed() {
                self.transition(SessionState::Terminated, "close requested");
            }

            match self.state {
                SessionState::Connecting => {
                    if let Some(mut old) = transport.take() {
                        old.close().await;
                    }
                    self.reconnects += 1;

                    match connect_and_subscribe(
                        self.connector.as_ref(),
                        self.tokens.as_ref(),
                        &self.params,
                    )
                    .await
                    {
                        Ok(t) => {
                            transport = Some(t);
                            self.transition(SessionState::Streaming, "reconnected");
                        }
                        Err(e) => {
                            warn!(vehicle_id = self.params.vehicle_id, "Reconnect failed: {}", e);
                            self.shared.fail(StreamError::Reconnect(Box::new(e)));
                            self.transition(SessionState::Terminated, "reconnect failed");
                        }
                    }
                }
                SessionState::Streaming => {
                    let Some(current) = transport.as_mut() else {
                        self.transition(SessionState::Connecting, "no transport");
                        continue;
                    };
                    let next = current.recv().await;
                    self.on_inbound(next).await;
                }
                SessionState::Terminated => break,
            }
        }

        if let Some(mut t) = transport.take() {
            t.close().await;
        }
        debug!(
            vehicle_id = self.params.vehicle_id,
            reconnects = self.reconnects,
            "Telemetry stream finished"
        );
        // Dropping `self.data` ends the consumer's sequence.
    }

    async fn on_inbound(&mut self, inbound: Option<StreamResult<String>>) {
        let text = match inbound {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                warn!("Streaming transport error: {}", e);
                self.transition(SessionState::Connecting, "transport error");
                return;
            }
            None => {
                self.transition(SessionState::Connecting, "server closed connection");
                return;
            }
        };

        let message: InboundMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping malformed streaming message: {}", e);
                return;
            }
        };

        match message.msg_type.as_str() {
            MSG_UPDATE => {
                let snapshot = decode_record(message.value.as_deref().unwrap_or_default());
                self.deliver(snapshot).await;
            }
            MSG_ERROR => {
                info!(
                    error_type = message.error_type.as_deref().unwrap_or("unknown"),
                    "Streaming server reported an error: {}",
                    message.value.as_deref().unwrap_or_default()
                );
                self.transition(SessionState::Connecting, "error frame");
            }
            other => trace!("Ignoring streaming message type {}", other),
        }
    }

    /// Push a snapshot, waiting for buffer space. Backs off on close.
    async fn deliver(&mut self, snapshot: TelemetrySnapshot) {
        tokio::select! {
            biased;
            sent = self.data.send(snapshot) => {
                if sent.is_err() {
                    self.transition(SessionState::Terminated, "consumer dropped");
                }
            }
            _ = self.shared.closed() => {
                self.transition(SessionState::Terminated, "close requested");
            }
        }
    }

    fn transition(&mut self, next: SessionState, reason: &str) {
        debug!(
            vehicle_id = self.params.vehicle_id,
            "Stream {} -> {} ({})", self.state, next, reason
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::auth::TokenStore;
    use crate::testing::MockConnector;

    const R1: &str = "1609459200000,10,100.0,90,1,0,1.0,2.0,5,2,300,290,0";
    const R2: &str = "1609459201000,20,100.1,89,1,0,1.0,2.0,6,2,299,289,0";
    const R3: &str = "1609459202000,30,100.2,88,1,0,1.0,2.0,7,2,298,288,0";

    fn tokens() -> Arc<dyn TokenProvider> {
        Arc::new(TokenStore::with_access_token("token-1"))
    }

    async fn next(stream: &mut TelemetryStream) -> Option<TelemetrySnapshot> {
        tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for stream")
    }

    #[tokio::test]
    async fn test_open_fails_synchronously_on_handshake_failure() {
        let connector = Arc::new(MockConnector::new());
        connector.push_failure("connection refused");

        let result = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await;

        assert!(matches!(result, Err(StreamError::Transport(_))));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_open_without_token_fails() {
        let connector = Arc::new(MockConnector::new());
        let _session = connector.push_session();

        let result = open(
            connector.clone(),
            Arc::new(TokenStore::new()),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await;

        assert!(matches!(result, Err(StreamError::MissingAccessToken)));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_updates_delivered_in_order() {
        let connector = Arc::new(MockConnector::new());
        let session = connector.push_session();

        let mut stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        session.update(R1);
        session.update(R2);
        session.update(R3);

        assert_eq!(next(&mut stream).await.unwrap().speed, 10);
        assert_eq!(next(&mut stream).await.unwrap().speed, 20);
        assert_eq!(next(&mut stream).await.unwrap().speed, 30);

        let handshakes = connector.handshakes();
        assert_eq!(handshakes.len(), 1);
        assert_eq!(handshakes[0].tag, "7");
        assert_eq!(handshakes[0].token, "token-1");
        assert_eq!(handshakes[0].msg_type, "data:subscribe_oauth");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages_are_skipped() {
        let connector = Arc::new(MockConnector::new());
        let session = connector.push_session();

        let mut stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        session.raw(r#"{"msg_type":"control:hello","connection_timeout":30000}"#);
        session.raw("not json");
        session.update(R1);

        assert_eq!(next(&mut stream).await.unwrap().speed, 10);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_error_frame_triggers_single_reconnect() {
        let connector = Arc::new(MockConnector::new());
        let first = connector.push_session();
        let second = connector.push_session();

        let tokens = Arc::new(TokenStore::with_access_token("token-1"));
        let mut stream = open(
            connector.clone(),
            tokens.clone(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        first.update(R1);
        assert_eq!(next(&mut stream).await.unwrap().speed, 10);

        // a refreshed token must be used for the reconnect handshake
        tokens.set_access_token("token-2");
        first.error("vehicle_disconnected");
        second.update(R2);
        second.update(R3);

        assert_eq!(next(&mut stream).await.unwrap().speed, 20);
        assert_eq!(next(&mut stream).await.unwrap().speed, 30);

        assert_eq!(connector.connect_count(), 2);
        assert!(first.is_closed());
        assert!(!second.is_closed());

        let handshakes = connector.handshakes();
        assert_eq!(handshakes.len(), 2);
        assert_eq!(handshakes[1].token, "token-2");
        assert_eq!(handshakes[0].tag, handshakes[1].tag);
        assert_eq!(handshakes[0].value, handshakes[1].value);
        assert!(stream.last_error().is_none());
    }

    #[tokio::test]
    async fn test_full_buffer_blocks_without_dropping() {
        let connector = Arc::new(MockConnector::new());
        let session = connector.push_session();

        let mut stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            1,
        )
        .await
        .unwrap();

        for speed in 0..20 {
            session.update(&format!(
                "1609459200000,{},100.0,90,1,0,1.0,2.0,5,2,300,290,0",
                speed
            ));
        }
        // let the producer run into the full buffer before draining
        tokio::time::sleep(Duration::from_millis(50)).await;

        for speed in 0..20 {
            assert_eq!(next(&mut stream).await.unwrap().speed, speed);
        }
        assert_eq!(connector.connect_count(), 1);
        assert!(stream.last_error().is_none());
    }

    #[tokio::test]
    async fn test_error_frame_with_mistyped_fields_reconnects() {
        let connector = Arc::new(MockConnector::new());
        let first = connector.push_session();
        let second = connector.push_session();

        let mut stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        first.raw(r#"{"msg_type":"data:error","tag":7,"value":false}"#);
        second.update(R2);

        assert_eq!(next(&mut stream).await.unwrap().speed, 20);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_failure_is_terminal() {
        let connector = Arc::new(MockConnector::new());
        let session = connector.push_session();
        connector.push_failure("endpoint unavailable");

        let mut stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        session.update(R1);
        session.error("server_error");
        session.update(R2);

        assert_eq!(next(&mut stream).await.unwrap().speed, 10);
        assert!(next(&mut stream).await.is_none());

        assert!(matches!(
            stream.last_error(),
            Some(StreamError::Reconnect(_))
        ));
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_reconnects() {
        let connector = Arc::new(MockConnector::new());
        let first = connector.push_session();
        let second = connector.push_session();

        let mut stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        first.fail("connection reset");
        second.update(R2);

        assert_eq!(next(&mut stream).await.unwrap().speed, 20);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_server_close_reconnects() {
        let connector = Arc::new(MockConnector::new());
        let first = connector.push_session();
        let second = connector.push_session();

        let mut stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        first.end();
        second.update(R3);

        assert_eq!(next(&mut stream).await.unwrap().speed, 30);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_close_ends_sequence_within_one_message() {
        let connector = Arc::new(MockConnector::new());
        let session = connector.push_session();

        let mut stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        session.update(R1);
        assert_eq!(next(&mut stream).await.unwrap().speed, 10);

        stream.close();
        // the task is parked on the socket read until one more message arrives
        session.update(R2);

        let mut remaining = 0;
        while next(&mut stream).await.is_some() {
            remaining += 1;
        }
        assert!(remaining <= 1);
        assert!(stream.last_error().is_none());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_close_unblocks_producer_on_full_buffer() {
        let connector = Arc::new(MockConnector::new());
        let session = connector.push_session();

        let stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            1,
        )
        .await
        .unwrap();

        // fill the buffer, then block the producer on the second push
        session.update(R1);
        session.update(R2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        stream.close();

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while !session.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(closed.is_ok(), "producer should stop after close");
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_task() {
        let connector = Arc::new(MockConnector::new());
        let session = connector.push_session();

        let stream = open(
            connector.clone(),
            tokens(),
            SubscriptionParams::with_default_fields(7),
            4,
        )
        .await
        .unwrap();

        drop(stream);
        session.update(R1);

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while !session.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(closed.is_ok());
    }
}
