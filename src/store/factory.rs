//! store::factory
//!
//! Object store creation from configuration.
//!
//! Callers use [`create_store`] rather than constructing a backend directly,
//! so the engine only ever sees `dyn ObjectStore`.
//!
//! # Example
//!
//! ```ignore
//! use remote_cherry_pick::core::config::Config;
//! use remote_cherry_pick::store::create_store;
//!
//! let config = Config::load(None)?;
//! let store = create_store(&config, provider)?;
//! ```

use std::sync::Arc;

use super::github::GitHubStore;
use super::traits::ObjectStore;
use crate::auth::TokenProvider;
use crate::core::config::{Config, ConfigError};

/// Build the GitHub store the configuration points at.
///
/// # Errors
///
/// Returns `ConfigError::NoStore` if neither `owner`/`repo` nor
/// `remote_url` is configured.
pub fn create_store(
    config: &Config,
    provider: Arc<dyn TokenProvider>,
) -> Result<Box<dyn ObjectStore>, ConfigError> {
    let (owner, repo) = config.store_location().ok_or(ConfigError::NoStore)?;
    tracing::debug!(%owner, %repo, api_base = config.api_base(), "creating github store");
    Ok(Box::new(GitHubStore::with_api_base(
        provider,
        owner,
        repo,
        config.api_base(),
    )))
}
