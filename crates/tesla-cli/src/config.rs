//! Configuration file handling for tesla-cli

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tesla_client::{streaming::DEFAULT_STREAMING_URL, DEFAULT_BASE_URL};

use crate::output::OutputFormat;

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Owner API base URL
    pub server: Option<String>,
    /// Telemetry streaming endpoint
    pub streaming_url: Option<String>,
    /// Access token
    pub access_token: Option<String>,
    /// Refresh token, kept alongside the access token
    pub refresh_token: Option<String>,
    /// Snapshots buffered while the terminal is busy
    pub stream_buffer: Option<usize>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("tesla-cli");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: ArgOverrides<'_>) -> MergedConfig {
        MergedConfig {
            server: args
                .server
                .map(String::from)
                .or_else(|| self.server.clone())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            streaming_url: args
                .streaming_url
                .map(String::from)
                .or_else(|| self.streaming_url.clone())
                .unwrap_or_else(|| DEFAULT_STREAMING_URL.to_string()),
            access_token: args
                .access_token
                .map(String::from)
                .or_else(|| self.access_token.clone()),
            refresh_token: self.refresh_token.clone(),
            stream_buffer: args.stream_buffer.or(self.stream_buffer),
            output: args
                .output
                .or_else(|| self.output.as_deref().and_then(OutputFormat::parse))
                .unwrap_or_default(),
            no_color: args.no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Values given on the command line (or via environment)
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgOverrides<'a> {
    pub server: Option<&'a str>,
    pub streaming_url: Option<&'a str>,
    pub access_token: Option<&'a str>,
    pub stream_buffer: Option<usize>,
    pub output: Option<OutputFormat>,
    pub no_color: bool,
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub server: String,
    pub streaming_url: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub stream_buffer: Option<usize>,
    pub output: OutputFormat,
    pub no_color: bool,
}
