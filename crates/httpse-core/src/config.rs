//! Service configuration.
//!
//! Loaded from JSON; every field has a default, so `{"store_path": "..."}` is
//! a complete config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Location of the HXS rule store
    pub store_path: PathBuf,
    /// Number of URLs kept in the recency cache (0 disables it)
    pub cache_capacity: usize,
    /// Rewrites allowed per request id
    pub max_rewrites_per_request: u32,
    /// Idle time after which a request's counter is reclaimed (0 disables)
    pub guard_idle_timeout_secs: u64,
    /// Cap on request ids tracked at once
    pub max_tracked_requests: usize,
    /// Testing hook: when set, every lookup uses this URL instead of the caller's
    pub url_override: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("httpse.hxs"),
            cache_capacity: 1000,
            max_rewrites_per_request: 5,
            guard_idle_timeout_secs: 300,
            max_tracked_requests: 10_000,
            url_override: None,
        }
    }
}

impl ServiceConfig {
    /// Default config pointing at `store_path`.
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store_path must not be empty".into()));
        }
        if self.max_rewrites_per_request == 0 {
            return Err(ConfigError::Invalid(
                "max_rewrites_per_request must be at least 1".into(),
            ));
        }
        if self.max_tracked_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_tracked_requests must be at least 1".into(),
            ));
        }
        if let Some(url) = &self.url_override {
            if url::Url::parse(url).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "url_override '{url}' is not a valid URL"
                )));
            }
        }
        Ok(())
    }

    pub fn guard_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.guard_idle_timeout_secs)
    }
}
