//! auth
//!
//! Bearer token plumbing for the GitHub object store.
//!
//! Obtaining and refreshing credentials is outside this crate; callers hand
//! the store a [`TokenProvider`]. [`StaticTokenProvider`] covers the common
//! case of a personal access token or an installation token minted
//! elsewhere.
//!
//! # Security
//!
//! Token values never appear in logs, error messages or `Debug` output.

use thiserror::Error;

/// Errors from token providers.
///
/// Messages intentionally carry no token material.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials are available for the host.
    #[error("not authenticated for host '{0}'")]
    NotAuthenticated(String),

    /// Credentials exist but could not be refreshed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Source of bearer tokens for API requests.
///
/// Called once per request, so implementations can refresh transparently.
/// Implementors must never log or expose token values.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a valid bearer token, refreshing if necessary.
    async fn bearer_token(&self) -> Result<String, AuthError>;

    /// Host this provider authenticates for (e.g. `github.com`).
    fn host(&self) -> &str;
}

/// A fixed token that is never refreshed.
pub struct StaticTokenProvider {
    token: String,
    host: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            host: host.into(),
        }
    }
}

// Custom Debug to avoid exposing the token
impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::NotAuthenticated(self.host.clone()));
        }
        Ok(self.token.clone())
    }

    fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_token() {
        let provider = StaticTokenProvider::new("ghp_example", "github.com");
        assert_eq!(provider.bearer_token().await.unwrap(), "ghp_example");
        assert_eq!(provider.host(), "github.com");
    }

    #[tokio::test]
    async fn empty_token_is_not_authenticated() {
        let provider = StaticTokenProvider::new("", "github.com");
        let err = provider.bearer_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated(ref h) if h == "github.com"));
    }

    #[test]
    fn debug_redacts_token() {
        let provider = StaticTokenProvider::new("secret_token_abc123", "github.com");
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("secret_token_abc123"));
        assert!(debug.contains("github.com"));
    }
}
