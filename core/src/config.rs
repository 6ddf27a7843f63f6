//! Client configuration loaded from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `API_BASE_URL` | `http://localhost:3001` |
//! | `API_TIMEOUT_SECS` | `30` |

use std::env::vars;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3001";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    api_base_url: Option<String>,
    api_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: validate_base_url(base_url)?,
            ..Self::default()
        })
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(vars())
    }

    pub fn from_vars<I, S>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let raw: RawConfig =
            serde_env::from_iter(vars).map_err(|e| ConfigError::Env(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let base_url = match raw.api_base_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                info!("Using provided API_BASE_URL: {}", url);
                validate_base_url(&url)?
            }
            None => DEFAULT_API_BASE_URL.to_string(),
        };
        let timeout = Duration::from_secs(raw.api_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        Ok(Self { base_url, timeout })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn validate_base_url(url: &str) -> Result<String, ConfigError> {
    let trimmed = url.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidBaseUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: url.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
