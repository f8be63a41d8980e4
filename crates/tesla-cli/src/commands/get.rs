//! Get command - raw authenticated GET

use anyhow::Result;
use tesla_client::OwnerClient;

use crate::output::OutputContext;

/// GET `path` and print the JSON response
pub async fn get(client: &OwnerClient, path: &str, ctx: &OutputContext) -> Result<()> {
    let value: serde_json::Value = client.get(path).await?;
    ctx.print_value(&value);
    Ok(())
}
