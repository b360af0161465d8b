//! Access-token seam for Twitch authentication.
//!
//! OAuth flow and token persistence are external collaborators. The core
//! only ever asks for the current token and, on a 401, asks for exactly one
//! refresh. Expiry arithmetic never happens here.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a token provider.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No live token can be produced; the user must re-authenticate.
    #[error("authentication required: {0}")]
    AuthRequired(String),
}

/// Convenient Result alias for token operations.
pub type TokenResult<T> = Result<T, TokenError>;

/// Provider of Twitch OAuth access tokens.
///
/// The contract: `access_token` always returns either a live token or an
/// authentication-required error, and `refresh` performs one refresh attempt
/// and returns the new token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current access token.
    async fn access_token(&self) -> TokenResult<String>;

    /// Refreshes and returns a new access token.
    ///
    /// Called by the Helix client after a 401; at most once per API call.
    async fn refresh(&self) -> TokenResult<String>;
}

/// Token provider backed by a fixed token from configuration.
///
/// Used by the headless server binary, where the operator supplies a token
/// out of band. A static token cannot be refreshed, so a 401 immediately
/// surfaces as authentication-required.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wraps a fixed access token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> TokenResult<String> {
        if self.token.is_empty() {
            return Err(TokenError::AuthRequired("no token configured".into()));
        }
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> TokenResult<String> {
        Err(TokenError::AuthRequired(
            "static token cannot be refreshed; re-authenticate".into(),
        ))
    }
}
