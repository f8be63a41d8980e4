//! Command command - send a remote command to a vehicle

use anyhow::{Context, Result};
use tesla_client::OwnerClient;

use crate::output::OutputContext;

/// Issue `name` to the vehicle, with an optional JSON body
pub async fn command(
    client: &OwnerClient,
    vehicle_id: u64,
    name: &str,
    body: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let body: Option<serde_json::Value> = body
        .map(serde_json::from_str)
        .transpose()
        .context("Command body must be valid JSON")?;

    client
        .command(vehicle_id, name, body.as_ref())
        .await
        .with_context(|| format!("Command '{}' failed", name))?;

    ctx.success(&format!("Command '{}' sent to vehicle {}", name, vehicle_id));
    Ok(())
}
