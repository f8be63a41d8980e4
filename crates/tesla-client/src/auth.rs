//! Bearer token session shared by REST calls and the telemetry stream

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Source of the current bearer token.
///
/// The telemetry stream reads the token each time it (re)connects, so a
/// token refreshed between connects is picked up automatically.
pub trait TokenProvider: Send + Sync {
    /// Current access token, if one has been set
    fn access_token(&self) -> Option<String>;
}

/// OAuth token pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Thread-safe token storage owned by [`crate::OwnerClient`]
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<Tokens>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding only an access token
    pub fn with_access_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set_access_token(token);
        store
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.tokens.write().access_token = Some(token.into());
    }

    /// Override the refresh token received from a previous login
    pub fn set_refresh_token(&self, token: impl Into<String>) {
        self.tokens.write().refresh_token = Some(token.into());
    }

    /// Replace both tokens at once, e.g. after an external token exchange
    pub fn set_tokens(&self, tokens: Tokens) {
        *self.tokens.write() = tokens;
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh_token.clone()
    }

    pub fn tokens(&self) -> Tokens {
        self.tokens.read().clone()
    }

    pub fn clear(&self) {
        *self.tokens.write() = Tokens::default();
    }
}

impl TokenProvider for TokenStore {
    fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
    }
}
