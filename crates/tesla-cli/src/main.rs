//! Tesla CLI - Command-line tool for the vehicle owner API
//!
//! Streams live telemetry, sends remote commands and issues raw API requests.

mod commands;
mod config;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tesla_client::{ClientConfig, OwnerClient};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{ArgOverrides, Config, MergedConfig};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "tesla-cli")]
#[command(author, version, about = "Vehicle owner API and telemetry CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Owner API base URL
    #[arg(short, long, env = "TESLA_SERVER")]
    server: Option<String>,

    /// Telemetry streaming endpoint
    #[arg(long, env = "TESLA_STREAMING_URL")]
    streaming_url: Option<String>,

    /// OAuth access token
    #[arg(short, long, env = "TESLA_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "TESLA_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging, including request and response bodies
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream live telemetry for a vehicle
    Stream {
        /// Vehicle ID
        vehicle_id: u64,

        /// Snapshots buffered while output is blocked
        #[arg(long)]
        buffer: Option<usize>,
    },

    /// Send a remote command to a vehicle
    Command {
        /// Vehicle ID
        vehicle_id: u64,

        /// Command name (e.g., honk_horn, flash_lights)
        name: String,

        /// Command parameters as a JSON object
        #[arg(long)]
        body: Option<String>,
    },

    /// Perform an authenticated GET and print the JSON response
    Get {
        /// Request path (e.g., /api/1/vehicles)
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    let stream_buffer = match &cli.command {
        Commands::Stream { buffer, .. } => *buffer,
        _ => None,
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(ArgOverrides {
        server: cli.server.as_deref(),
        streaming_url: cli.streaming_url.as_deref(),
        access_token: cli.token.as_deref(),
        stream_buffer,
        output: cli.output,
        no_color: cli.no_color,
    });

    debug!(
        server = %merged.server,
        streaming_url = %merged.streaming_url,
        output = merged.output.as_str(),
        has_token = merged.access_token.is_some(),
        "Resolved configuration"
    );

    // Create output context
    let ctx = OutputContext::new(merged.output, merged.no_color, cli.quiet);

    let client = create_client(&merged)?;
    client.set_debug_mode(cli.verbose);

    // Execute command
    match &cli.command {
        Commands::Stream { vehicle_id, .. } => {
            commands::stream(&client, *vehicle_id, &ctx).await?;
        }

        Commands::Command {
            vehicle_id,
            name,
            body,
        } => {
            commands::command(&client, *vehicle_id, name, body.as_deref(), &ctx).await?;
        }

        Commands::Get { path } => {
            commands::get(&client, path, &ctx).await?;
        }
    }

    Ok(())
}

/// Create an owner API client from the merged configuration
fn create_client(merged: &MergedConfig) -> Result<OwnerClient> {
    let mut config = ClientConfig {
        base_url: merged.server.clone(),
        streaming_url: merged.streaming_url.clone(),
        ..ClientConfig::default()
    };
    if let Some(buffer) = merged.stream_buffer {
        config.stream_buffer = buffer.max(1);
    }

    let client = OwnerClient::with_config(config).context("Failed to create owner API client")?;

    if let Some(token) = &merged.access_token {
        client.tokens().set_access_token(token);
    }
    if let Some(token) = &merged.refresh_token {
        client.tokens().set_refresh_token(token);
    }

    Ok(client)
}
