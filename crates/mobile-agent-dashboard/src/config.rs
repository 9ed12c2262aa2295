use std::time::Duration;

use mobile_agent_client::{
    DEFAULT_BACKEND_URL, DEFAULT_FRONTEND_URL, DEFAULT_TIMEOUT_MS, MobileAgentClientConfig,
};
use thiserror::Error;

use crate::log::DEFAULT_LOG_CAPACITY;

pub const ENV_BACKEND_URL: &str = "MOBILE_AGENT_BACKEND_URL";
pub const ENV_FRONTEND_URL: &str = "MOBILE_AGENT_FRONTEND_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "MOBILE_AGENT_REQUEST_TIMEOUT_MS";
pub const ENV_SCREENSHOT_POLL_MS: &str = "MOBILE_AGENT_SCREENSHOT_POLL_MS";
pub const ENV_LOG_CAPACITY: &str = "MOBILE_AGENT_LOG_CAPACITY";

pub const DEFAULT_SCREENSHOT_POLL_MS: u64 = 5_000;
pub const ELAPSED_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub backend_base_url: String,
    pub frontend_base_url: String,
    pub request_timeout_ms: u64,
    /// Zero disables idle screenshot polling.
    pub screenshot_poll_ms: u64,
    pub log_capacity: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: expected an http(s) url, got {value:?}")]
    InvalidUrl { key: &'static str, value: String },
    #[error("invalid MOBILE_AGENT_REQUEST_TIMEOUT_MS: {0}")]
    InvalidRequestTimeout(String),
    #[error("invalid MOBILE_AGENT_SCREENSHOT_POLL_MS: {0}")]
    InvalidScreenshotPoll(String),
    #[error("invalid MOBILE_AGENT_LOG_CAPACITY: {0}")]
    InvalidLogCapacity(String),
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            backend_base_url: DEFAULT_BACKEND_URL.to_string(),
            frontend_base_url: DEFAULT_FRONTEND_URL.to_string(),
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            screenshot_poll_ms: DEFAULT_SCREENSHOT_POLL_MS,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let backend_base_url = match value(ENV_BACKEND_URL) {
            Some(url) => validate_url(ENV_BACKEND_URL, url)?,
            None => defaults.backend_base_url,
        };
        let frontend_base_url = match value(ENV_FRONTEND_URL) {
            Some(url) => validate_url(ENV_FRONTEND_URL, url)?,
            None => defaults.frontend_base_url,
        };
        let request_timeout_ms = value(ENV_REQUEST_TIMEOUT_MS)
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .map_err(|error| ConfigError::InvalidRequestTimeout(error.to_string()))?
            .unwrap_or(defaults.request_timeout_ms);
        let screenshot_poll_ms = value(ENV_SCREENSHOT_POLL_MS)
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .map_err(|error| ConfigError::InvalidScreenshotPoll(error.to_string()))?
            .unwrap_or(defaults.screenshot_poll_ms);
        let log_capacity = value(ENV_LOG_CAPACITY)
            .map(|raw| raw.parse::<usize>())
            .transpose()
            .map_err(|error| ConfigError::InvalidLogCapacity(error.to_string()))?
            .unwrap_or(defaults.log_capacity);
        if log_capacity == 0 {
            return Err(ConfigError::InvalidLogCapacity(
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            backend_base_url,
            frontend_base_url,
            request_timeout_ms,
            screenshot_poll_ms,
            log_capacity,
        })
    }

    #[must_use]
    pub fn screenshot_poll_interval(&self) -> Option<Duration> {
        (self.screenshot_poll_ms > 0).then(|| Duration::from_millis(self.screenshot_poll_ms))
    }

    #[must_use]
    pub fn client_config(&self) -> MobileAgentClientConfig {
        let mut config = MobileAgentClientConfig::new(
            self.backend_base_url.clone(),
            self.frontend_base_url.clone(),
        );
        config.timeout_ms = self.request_timeout_ms;
        config
    }
}

fn validate_url(key: &'static str, url: String) -> Result<String, ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::InvalidUrl { key, value: url })
    }
}
