//! core::config
//!
//! Configuration loading.
//!
//! # Locations
//!
//! The first file found wins:
//! 1. An explicit path passed to [`Config::load`]
//! 2. `$CHERRY_PICK_CONFIG` if set
//! 3. `$XDG_CONFIG_HOME/cherry-pick/config.toml`
//! 4. `~/.cherry-pick/config.toml`
//!
//! A missing file is not an error; defaults are used. An explicit path
//! that does not exist is.
//!
//! # Example
//!
//! ```no_run
//! use remote_cherry_pick::core::config::Config;
//!
//! let config = Config::load(None).unwrap();
//! if let Some((owner, repo)) = config.store_location() {
//!     println!("store: {}/{}", owner, repo);
//! }
//! ```

pub mod schema;

pub use schema::{CommitterConfig, ConfigFile, StoreConfig};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::store::github::DEFAULT_API_BASE;
use crate::store::Signature;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "CHERRY_PICK_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("no object store configured: set [store] owner/repo or remote_url")]
    NoStore,
}

/// Loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub file: ConfigFile,
    /// Path the configuration was read from, if any
    loaded_from: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `explicit` or the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed
    /// or validated, or if `explicit` does not exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::search(),
        };

        let Some(path) = path else {
            tracing::debug!("no config file found, using defaults");
            return Ok(Self::default());
        };

        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        file.validate()?;

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(Self {
            file,
            loaded_from: Some(path),
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            message: e.to_string(),
        })?;
        file.validate()?;
        Ok(Self {
            file,
            loaded_from: None,
        })
    }

    /// First existing file among the default locations.
    fn search() -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            candidates.push(PathBuf::from(path));
        }
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            candidates.push(PathBuf::from(xdg_home).join("cherry-pick/config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".cherry-pick/config.toml"));
        }
        candidates.into_iter().find(|p| p.exists())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// `(owner, repo)` of the configured store, if any.
    pub fn store_location(&self) -> Option<(String, String)> {
        self.file.store.as_ref().and_then(StoreConfig::location)
    }

    /// API base URL. Defaults to `https://api.github.com`.
    pub fn api_base(&self) -> &str {
        self.file
            .store
            .as_ref()
            .and_then(|s| s.api_base.as_deref())
            .unwrap_or(DEFAULT_API_BASE)
    }

    /// Committer signature stamped now, if a committer is configured.
    pub fn committer(&self) -> Option<Signature> {
        self.file
            .committer
            .as_ref()
            .map(|c| Signature::now(c.name.clone(), c.email.clone()))
    }

    /// Path the configuration was read from.
    pub fn loaded_from(&self) -> Option<&Path> {
        self.loaded_from.as_deref()
    }
}
