//! Test utilities for tesla-client
//!
//! - [`TestServer`]: serves an axum router and hands back a client pointed at it
//! - [`MockStreamingServer`]: a real WebSocket endpoint that plays scripted frames
//! - [`MockConnector`]: in-memory [`Connector`] for driving the connection
//!   manager without sockets

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;

use crate::client::{ClientConfig, OwnerClient};
use crate::streaming::{
    Connector, Handshake, InboundMessage, StreamError, StreamResult, Transport,
};
use crate::Result;

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: OwnerClient,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on an ephemeral port
    ///
    /// # Example
    ///
    /// ```ignore
    /// use axum::{routing::get, Json, Router};
    /// use tesla_client::testing::TestServer;
    ///
    /// let router = Router::new().route("/ping", get(|| async { Json("pong") }));
    /// let server = TestServer::start(router).await?;
    /// let pong: String = server.client.get("/ping").await?;
    /// ```
    pub async fn start<S>(router: axum::Router<S>) -> Result<Self>
    where
        S: Clone + Send + Sync + 'static,
        axum::Router<S>: Into<axum::Router>,
    {
        Self::start_with_timeout(router, Duration::from_secs(5), Duration::from_secs(2)).await
    }

    /// Serve `router` with custom client timeouts
    pub async fn start_with_timeout<S>(
        router: axum::Router<S>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self>
    where
        S: Clone + Send + Sync + 'static,
        axum::Router<S>: Into<axum::Router>,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let router: axum::Router = router.into();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        let config = ClientConfig {
            base_url: format!("http://{}", addr),
            timeout,
            connect_timeout,
            ..ClientConfig::default()
        };
        let client = OwnerClient::with_config(config)?;

        Ok(Self {
            addr,
            client,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// WebSocket server that replays one script per accepted connection.
///
/// Connection *n* receives `scripts[n]` right after its handshake arrives and
/// is then held open until the client disconnects. Once every script has
/// been handed out the listener is dropped, so further connects are refused.
pub struct MockStreamingServer {
    pub addr: SocketAddr,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockStreamingServer {
    pub async fn start(scripts: Vec<Vec<InboundMessage>>) -> std::io::Result<Self> {
        Self::start_paced(scripts, Duration::ZERO).await
    }

    /// Like [`start`](Self::start), but waits `interval` before each frame
    pub async fn start_paced(
        scripts: Vec<Vec<InboundMessage>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handshakes = Arc::new(Mutex::new(Vec::new()));

        let recorded = handshakes.clone();
        let handle = tokio::spawn(async move {
            for script in scripts {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_script(socket, script, interval, recorded.clone()));
            }
            debug!("Mock streaming server exhausted its scripts");
        });

        Ok(Self {
            addr,
            handshakes,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/streaming/", self.addr)
    }

    /// Handshakes received so far, in connection order
    pub fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.lock().clone()
    }
}

impl Drop for MockStreamingServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_script(
    socket: tokio::net::TcpStream,
    script: Vec<InboundMessage>,
    interval: Duration,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
        return;
    };

    match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            if let Ok(handshake) = serde_json::from_str::<Handshake>(text.as_str()) {
                handshakes.lock().push(handshake);
            }
        }
        _ => return,
    }

    for message in script {
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        let Ok(text) = serde_json::to_string(&message) else {
            continue;
        };
        if ws.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    // Hold the connection until the client goes away
    while let Some(Ok(frame)) = ws.next().await {
        if frame.is_close() {
            break;
        }
    }
}

enum MockFrame {
    Text(String),
    Fail(String),
    End,
}

enum Scripted {
    Session(MockTransport),
    Failure(String),
}

/// In-memory [`Connector`] handing out scripted sessions in order.
///
/// Each [`push_session`](Self::push_session) queues one successful connect;
/// [`push_failure`](Self::push_failure) queues a failed one. A connect with
/// nothing queued fails.
#[derive(Default)]
pub struct MockConnector {
    scripted: Mutex<VecDeque<Scripted>>,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful connect and return its server side
    pub fn push_session(&self) -> MockSession {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.scripted.lock().push_back(Scripted::Session(MockTransport {
            inbound: rx,
            handshakes: self.handshakes.clone(),
            closed: closed.clone(),
        }));
        MockSession { tx, closed }
    }

    /// Queue a failed connect
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.scripted
            .lock()
            .push_back(Scripted::Failure(reason.into()));
    }

    /// Number of connect attempts so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> StreamResult<Box<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.scripted.lock().pop_front() {
            Some(Scripted::Session(transport)) => Ok(Box::new(transport)),
            Some(Scripted::Failure(reason)) => Err(StreamError::Transport(reason)),
            None => Err(StreamError::Transport("no scripted session".to_string())),
        }
    }
}

/// Server side of a [`MockConnector`] session
pub struct MockSession {
    tx: mpsc::UnboundedSender<MockFrame>,
    closed: Arc<AtomicBool>,
}

impl MockSession {
    /// Push a `data:update` frame carrying `record`
    pub fn update(&self, record: &str) {
        self.send_message(&InboundMessage::update(record));
    }

    /// Push a `data:error` frame
    pub fn error(&self, error_type: &str) {
        self.send_message(&InboundMessage::error(error_type, "stream error"));
    }

    /// Push raw text as-is
    pub fn raw(&self, text: &str) {
        let _ = self.tx.send(MockFrame::Text(text.to_string()));
    }

    /// Make the next read fail with a transport error
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(MockFrame::Fail(reason.to_string()));
    }

    /// Close the connection from the server side
    pub fn end(&self) {
        let _ = self.tx.send(MockFrame::End);
    }

    /// Whether the client has closed this transport
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send_message(&self, message: &InboundMessage) {
        if let Ok(text) = serde_json::to_string(message) {
            let _ = self.tx.send(MockFrame::Text(text));
        }
    }
}

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<MockFrame>,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> StreamResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Transport("transport closed".to_string()));
        }
        if let Ok(handshake) = serde_json::from_str::<Handshake>(&text) {
            self.handshakes.lock().push(handshake);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<StreamResult<String>> {
        match self.inbound.recv().await? {
            MockFrame::Text(text) => Some(Ok(text)),
            MockFrame::Fail(reason) => Some(Err(StreamError::Transport(reason))),
            MockFrame::End => None,
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}
