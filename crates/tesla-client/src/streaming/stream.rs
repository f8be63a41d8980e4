//! Consumer side of a telemetry stream

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::stream::Stream;
use tokio::sync::{mpsc, Notify};

use super::types::{StreamError, TelemetrySnapshot};

/// State shared between the consumer and the connection task
#[derive(Debug, Default)]
pub(crate) struct StreamShared {
    closed: AtomicBool,
    close_notify: Notify,
    error: OnceLock<StreamError>,
}

impl StreamShared {
    pub(crate) fn request_close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_notify.notify_waiters();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once close has been requested
    pub(crate) async fn closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Record the terminal error. Only the first call has any effect.
    pub(crate) fn fail(&self, error: StreamError) {
        let _ = self.error.set(error);
    }

    pub(crate) fn error(&self) -> Option<&StreamError> {
        self.error.get()
    }
}

/// Cloneable control for a running stream.
///
/// Lets another task (or a signal handler) close the stream or inspect its
/// terminal error without owning the data endpoint.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    /// Request shutdown. Idempotent.
    ///
    /// Cooperative: the connection task notices the flag between inbound
    /// messages, so up to one more snapshot may still be delivered before
    /// the data sequence ends. A read already waiting on the socket is not
    /// interrupted.
    pub fn close(&self) {
        self.shared.request_close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Terminal error, if the stream ended abnormally
    pub fn last_error(&self) -> Option<&StreamError> {
        self.shared.error()
    }
}

/// A live telemetry stream for one vehicle
///
/// Implements `Stream<Item = TelemetrySnapshot>`. The sequence ends when the
/// stream is closed by the consumer or fails permanently; check
/// [`last_error`](Self::last_error) afterwards to tell the two apart.
///
/// # Example
///
/// ```ignore
/// let mut stream = client.stream(vehicle_id).await?;
///
/// while let Some(snapshot) = stream.next().await {
///     println!("{} km/h, {}%", snapshot.speed, snapshot.soc);
/// }
///
/// if let Some(err) = stream.last_error() {
///     eprintln!("stream failed: {}", err);
/// }
/// ```
#[derive(Debug)]
pub struct TelemetryStream {
    data: mpsc::Receiver<TelemetrySnapshot>,
    handle: StreamHandle,
}

impl TelemetryStream {
    pub(crate) fn new(data: mpsc::Receiver<TelemetrySnapshot>, shared: Arc<StreamShared>) -> Self {
        Self {
            data,
            handle: StreamHandle { shared },
        }
    }

    /// Receiving end of the snapshot buffer
    pub fn data(&mut self) -> &mut mpsc::Receiver<TelemetrySnapshot> {
        &mut self.data
    }

    /// Wait for the next snapshot. Returns `None` at end of sequence.
    pub async fn next(&mut self) -> Option<TelemetrySnapshot> {
        self.data.recv().await
    }

    /// See [`StreamHandle::close`]
    pub fn close(&self) {
        self.handle.close();
    }

    pub fn last_error(&self) -> Option<&StreamError> {
        self.handle.last_error()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }
}

impl Stream for TelemetryStream {
    type Item = TelemetrySnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.data.poll_recv(cx)
    }
}

impl Drop for TelemetryStream {
    fn drop(&mut self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn new_stream(capacity: usize) -> (mpsc::Sender<TelemetrySnapshot>, TelemetryStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, TelemetryStream::new(rx, Arc::new(StreamShared::default())))
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_tx, stream) = new_stream(1);
        assert!(!stream.is_closed());
        stream.close();
        stream.close();
        assert!(stream.is_closed());
        assert!(stream.last_error().is_none());
    }

    #[test]
    fn test_error_slot_is_write_once() {
        let shared = StreamShared::default();
        shared.fail(StreamError::MissingAccessToken);
        shared.fail(StreamError::Transport("later".into()));
        assert!(matches!(shared.error(), Some(StreamError::MissingAccessToken)));
    }

    #[test]
    fn test_handle_shares_state() {
        let (_tx, stream) = new_stream(1);
        let handle = stream.handle();
        handle.close();
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn test_closed_future_wakes_on_close() {
        let shared = Arc::new(StreamShared::default());
        let waiter = {
            let shared = shared.clone();
            tokio::spawn(async move { shared.closed().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        shared.request_close();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sequence_ends_when_sender_dropped() {
        let (tx, mut stream) = new_stream(2);
        tx.send(TelemetrySnapshot::default()).await.unwrap();
        drop(tx);

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_requests_close() {
        let (_tx, stream) = new_stream(1);
        let handle = stream.handle();
        drop(stream);
        assert!(handle.is_closed());
    }
}
