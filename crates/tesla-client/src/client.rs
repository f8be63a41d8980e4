//! Owner API HTTP client implementation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use crate::auth::{TokenProvider, TokenStore};
use crate::error::{OwnerClientError, Result};
use crate::streaming::{
    self, SubscriptionParams, TelemetryStream, WebSocketConnector, DEFAULT_BUFFER_CAPACITY,
    DEFAULT_STREAMING_URL,
};
use crate::types::*;

/// URL for the owner API
pub const DEFAULT_BASE_URL: &str = "https://owner-api.teslamotors.com";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL
    pub base_url: String,
    /// WebSocket endpoint for telemetry streaming
    pub streaming_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Snapshots buffered per telemetry stream before the producer waits
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            streaming_url: DEFAULT_STREAMING_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stream_buffer: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Owner API client
///
/// Performs authenticated JSON requests and opens telemetry streams. Clones
/// share the connection pool and the token store.
#[derive(Debug, Clone)]
pub struct OwnerClient {
    client: Client,
    base_url: Url,
    config: ClientConfig,
    tokens: Arc<TokenStore>,
    debug: Arc<AtomicBool>,
}

impl OwnerClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the owner API (e.g., "https://owner-api.teslamotors.com")
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(ClientConfig {
            base_url: base_url.to_string(),
            ..ClientConfig::default()
        })
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        let base_url = Url::parse(&config.base_url)?;
        Url::parse(&config.streaming_url)?;

        Ok(Self {
            client,
            base_url,
            config,
            tokens: Arc::new(TokenStore::new()),
            debug: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a new client that already holds an access token
    pub fn with_access_token(base_url: &str, token: &str) -> Result<Self> {
        let client = Self::new(base_url)?;
        client.tokens.set_access_token(token);
        Ok(client)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Token session used for REST calls and stream handshakes
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Get a reference to the underlying HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    /// Log request and response bodies at debug level
    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    // =========================================================================
    // Generic Request Primitive
    // =========================================================================

    /// Perform a JSON request against `path`.
    ///
    /// Sends `Authorization: Bearer` when an access token is set. A non-2xx
    /// status becomes [`OwnerClientError::HttpStatus`].
    #[instrument(skip(self, body))]
    pub async fn request<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.base_url.join(path)?;
        let debug_mode = self.debug.load(Ordering::Relaxed);

        let mut request = self.client.request(method.clone(), url.clone());

        if let Some(body) = body {
            let bytes =
                serde_json::to_vec(body).map_err(|e| OwnerClientError::ParseError(e.to_string()))?;
            if debug_mode {
                debug!(%method, %url, body = %String::from_utf8_lossy(&bytes), "Request");
            }
            request = request.header(CONTENT_TYPE, "application/json").body(bytes);
        } else if debug_mode {
            debug!(%method, %url, "Request");
        }

        if let Some(token) = self.tokens.access_token() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        self.handle_response(response, debug_mode).await
    }

    /// GET `path`
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    /// POST `body` to `path`
    pub async fn post<B, T>(&self, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, body).await
    }

    /// Authenticated `/api/1` call: requires a token and unwraps the
    /// `{"response": ...}` envelope.
    pub async fn api_request<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.require_token()?;
        self.request::<B, ApiResponse<T>>(method, path, body)
            .await
            .map(|r| r.response)
    }

    // =========================================================================
    // Vehicle Commands
    // =========================================================================

    /// Issue `command` to a vehicle.
    ///
    /// Routes through: `POST /api/1/vehicles/{vehicle_id}/command/{command}`
    #[instrument(skip(self, body))]
    pub async fn command<B>(&self, vehicle_id: u64, command: &str, body: Option<&B>) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let path = format!("/api/1/vehicles/{}/command/{}", vehicle_id, command);
        let result: CommandResult = self.api_request(Method::POST, &path, body).await?;

        if result.result {
            Ok(())
        } else {
            Err(OwnerClientError::CommandFailed(result.reason))
        }
    }

    // =========================================================================
    // Telemetry Streaming
    // =========================================================================

    /// Open a telemetry stream for `vehicle_id` with the default field set
    #[instrument(skip(self))]
    pub async fn stream(&self, vehicle_id: u64) -> Result<TelemetryStream> {
        self.open_stream(SubscriptionParams::with_default_fields(vehicle_id))
            .await
    }

    /// Open a telemetry stream requesting a custom field list.
    ///
    /// Records are still decoded positionally, so `fields` must keep the
    /// default order to map onto [`TelemetrySnapshot`](crate::TelemetrySnapshot).
    pub async fn stream_with_fields(
        &self,
        vehicle_id: u64,
        fields: Vec<String>,
    ) -> Result<TelemetryStream> {
        self.open_stream(SubscriptionParams::new(vehicle_id, fields))
            .await
    }

    async fn open_stream(&self, params: SubscriptionParams) -> Result<TelemetryStream> {
        self.require_token()?;

        let connector = Arc::new(WebSocketConnector::new(
            self.config.streaming_url.clone(),
            self.config.connect_timeout,
        ));
        let stream = streaming::open(
            connector,
            self.tokens.clone(),
            params,
            self.config.stream_buffer,
        )
        .await?;

        Ok(stream)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_token(&self) -> Result<()> {
        if self.tokens.access_token().is_none() {
            return Err(OwnerClientError::MissingAccessToken);
        }
        Ok(())
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        debug_mode: bool,
    ) -> Result<T> {
        let status = response.status();
        let bytes = response.bytes().await?;

        if debug_mode {
            debug!(%status, body = %String::from_utf8_lossy(&bytes), "Response");
        }

        if status.is_success() {
            serde_json::from_slice(&bytes).map_err(|e| OwnerClientError::ParseError(e.to_string()))
        } else {
            Err(Self::error_from_status(status, &bytes))
        }
    }

    fn error_from_status(status: StatusCode, body: &[u8]) -> OwnerClientError {
        let message = match serde_json::from_slice::<ErrorResponse>(body) {
            Ok(err) => err.error,
            Err(_) => format!("HTTP {}", status),
        };

        match status {
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => OwnerClientError::Timeout,
            _ => OwnerClientError::http_status(status.as_u16(), message),
        }
    }
}
