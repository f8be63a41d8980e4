//! Stream command - live telemetry over the streaming WebSocket

use std::sync::Arc;

use anyhow::{Context, Result};
use tesla_client::{OwnerClient, TelemetrySnapshot, TelemetryStream};
use tokio::sync::Notify;

use crate::output::{OutputContext, OutputFormat, SnapshotPrinter};

/// Print telemetry snapshots for a vehicle until Ctrl+C or the stream ends
pub async fn stream(client: &OwnerClient, vehicle_id: u64, ctx: &OutputContext) -> Result<()> {
    ctx.info(&format!(
        "Subscribing to vehicle {} ({} output)...",
        vehicle_id,
        ctx.format.as_str()
    ));

    let mut stream = client
        .stream(vehicle_id)
        .await
        .with_context(|| format!("Failed to open telemetry stream for vehicle {}", vehicle_id))?;

    ctx.info("Press Ctrl+C to stop");

    // Close alone waits for the next inbound frame, so wake the loop too
    let stop = Arc::new(Notify::new());
    let handle = stream.handle();
    let s = stop.clone();
    ctrlc::set_handler(move || {
        handle.close();
        s.notify_one();
    })?;

    if ctx.format == OutputFormat::Table && !ctx.quiet {
        println!();
    }

    let mut printer = SnapshotPrinter::new(ctx);
    let received = drain(&mut stream, &stop, |snapshot| printer.print(snapshot)).await;

    if let Some(err) = stream.last_error() {
        ctx.error(&format!("Stream error: {}", err));
        anyhow::bail!("Telemetry stream for vehicle {} failed: {}", vehicle_id, err);
    }

    ctx.info("");
    ctx.success(&format!("Stream closed after {} snapshot(s)", received));
    Ok(())
}

/// Feed snapshots to `on_snapshot` until the sequence ends or `stop` fires.
///
/// Returns the number of snapshots handled.
async fn drain<F>(stream: &mut TelemetryStream, stop: &Notify, mut on_snapshot: F) -> u64
where
    F: FnMut(&TelemetrySnapshot),
{
    let mut received = 0;
    let stopped = loop {
        tokio::select! {
            biased;
            _ = stop.notified() => break true,
            next = stream.next() => match next {
                Some(snapshot) => {
                    on_snapshot(&snapshot);
                    received += 1;
                }
                None => break false,
            },
        }
    };
    if stopped {
        stream.close();
    }
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tesla_client::streaming::{open, SubscriptionParams};
    use tesla_client::testing::MockConnector;
    use tesla_client::TokenStore;

    const RECORD: &str = "1609459200000,42,100.0,90,1,0,1.0,2.0,5,2,300,290,0";

    async fn open_mock(connector: &Arc<MockConnector>) -> TelemetryStream {
        open(
            connector.clone(),
            Arc::new(TokenStore::with_access_token("t")),
            SubscriptionParams::with_default_fields(1),
            4,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_stop_exits_on_silent_stream() {
        let connector = Arc::new(MockConnector::new());
        let _session = connector.push_session();
        let mut stream = open_mock(&connector).await;

        let stop = Arc::new(Notify::new());
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.notify_one();
        });

        let received = tokio::time::timeout(
            Duration::from_secs(2),
            drain(&mut stream, &stop, |_| {}),
        )
        .await
        .expect("stop should end the loop without further frames");

        assert_eq!(received, 0);
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn test_drain_counts_until_end_of_sequence() {
        let connector = Arc::new(MockConnector::new());
        let session = connector.push_session();
        let mut stream = open_mock(&connector).await;

        session.update(RECORD);
        session.update(RECORD);
        // server close with no session left to reconnect to ends the sequence
        session.end();

        let mut speeds = Vec::new();
        let received = tokio::time::timeout(
            Duration::from_secs(2),
            drain(&mut stream, &Notify::new(), |s| speeds.push(s.speed)),
        )
        .await
        .unwrap();

        assert_eq!(received, 2);
        assert_eq!(speeds, vec![42, 42]);
        assert!(stream.last_error().is_some());
    }
}
