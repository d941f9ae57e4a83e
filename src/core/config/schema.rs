//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Example
//!
//! ```toml
//! [store]
//! owner = "octocat"
//! repo = "hello-world"
//! api_base = "https://github.example.com/api/v3"
//!
//! [committer]
//! name = "Release Bot"
//! email = "release-bot@example.com"
//! ```
//!
//! # Validation
//!
//! Values are validated after parsing: the store must be identified either
//! by `owner`/`repo` or by `remote_url`, not both, and committer fields must
//! be non-empty.

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::store::github::parse_github_url;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Which repository the object store talks to
    pub store: Option<StoreConfig>,

    /// Identity stamped as committer on cherry-picked commits
    pub committer: Option<CommitterConfig>,
}

impl ConfigFile {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(store) = &self.store {
            store.validate()?;
        }
        if let Some(committer) = &self.committer {
            committer.validate()?;
        }
        Ok(())
    }
}

/// Repository identification for the GitHub object store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Repository owner (user or organization)
    pub owner: Option<String>,

    /// Repository name
    pub repo: Option<String>,

    /// Git remote URL, as an alternative to owner/repo
    pub remote_url: Option<String>,

    /// API base URL (GitHub Enterprise); defaults to api.github.com
    pub api_base: Option<String>,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let explicit = self.owner.is_some() || self.repo.is_some();
        match (&self.remote_url, explicit) {
            (Some(_), true) => Err(ConfigError::InvalidValue(
                "store: set either remote_url or owner/repo, not both".into(),
            )),
            (Some(url), false) => {
                if parse_github_url(url).is_none() {
                    return Err(ConfigError::InvalidValue(format!(
                        "store.remote_url '{}' is not a GitHub URL",
                        url
                    )));
                }
                Ok(())
            }
            (None, _) => {
                for (field, value) in [("owner", &self.owner), ("repo", &self.repo)] {
                    match value.as_deref() {
                        Some(v) if !v.trim().is_empty() && !v.contains('/') => {}
                        Some(v) => {
                            return Err(ConfigError::InvalidValue(format!(
                                "store.{field} '{v}' is not a valid name"
                            )))
                        }
                        None if explicit => {
                            return Err(ConfigError::InvalidValue(format!(
                                "store.{field} is required when the other is set"
                            )))
                        }
                        None => {}
                    }
                }
                Ok(())
            }
        }
    }

    /// Resolve `(owner, repo)` from whichever form is configured.
    pub fn location(&self) -> Option<(String, String)> {
        if let Some(url) = &self.remote_url {
            return parse_github_url(url);
        }
        Some((self.owner.clone()?, self.repo.clone()?))
    }
}

/// Committer identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommitterConfig {
    pub name: String,
    pub email: String,
}

impl CommitterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "committer.name cannot be empty".into(),
            ));
        }
        if !self.email.contains('@') {
            return Err(ConfigError::InvalidValue(format!(
                "committer.email '{}' is not an email address",
                self.email
            )));
        }
        Ok(())
    }
}
