//! Bearer token providers
//!
//! Every video-streaming request carries `Authorization: Bearer <token>`.
//! The token is looked up through an injected [`TokenProvider`] rather than
//! from ambient global state, so callers decide where it comes from.
//!
//! # Implementations
//!
//! - [`StaticToken`] - A token fixed at construction time
//! - [`EnvToken`] - A token read from an environment variable on every lookup
//!
//! # Example
//!
//! ```
//! use course_video_uploadr::auth::{StaticToken, TokenProvider};
//!
//! let provider = StaticToken::new("secret-token");
//! assert_eq!(provider.token().as_deref(), Some("secret-token"));
//! ```

use crate::config::AuthConfig;
use std::sync::Arc;
use thiserror::Error;

/// Token lookup errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing authentication token: {0}")]
    MissingToken(String),
}

/// Source of the bearer token attached to API calls
///
/// Returning `None` means no valid token is available; API calls then fail
/// before any request is sent.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        let token = self.token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

/// A token read from an environment variable at lookup time
#[derive(Debug, Clone)]
pub struct EnvToken {
    var_name: String,
}

impl EnvToken {
    pub fn new(var_name: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
        }
    }

    pub fn var_name(&self) -> &str {
        &self.var_name
    }
}

impl TokenProvider for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Build the provider described by the `auth` config section
///
/// An explicit `token` wins. A token that still contains an unexpanded
/// `${VAR}` placeholder is treated as missing.
pub fn provider_from_config(config: &AuthConfig) -> Result<Arc<dyn TokenProvider>, AuthError> {
    match config.token.as_deref().map(str::trim) {
        Some(token) if token.contains("${") => Err(AuthError::MissingToken(format!(
            "token placeholder '{}' was not expanded",
            token
        ))),
        Some(token) if !token.is_empty() => Ok(Arc::new(StaticToken::new(token))),
        _ => Ok(Arc::new(EnvToken::new(config.token_env.clone()))),
    }
}
