// Client configuration: upstream endpoints, timeouts, and commit polling policy

use crate::error::ClientError;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_COMMIT_PATH: &str = "/api/nsk/v3/booking";
pub const DEFAULT_STATUS_PATH: &str = "/api/nsk/v1/booking/status";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub user_agent: String,
    pub endpoints: Endpoints,
    pub retry: RetryConfig,
    pub poll: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_ms: 30_000,
            user_agent: concat!("dcs-booking-client/", env!("CARGO_PKG_VERSION")).to_string(),
            endpoints: Endpoints::default(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Reads `DCS_BASE_URL` (required) plus optional `DCS_REQUEST_TIMEOUT_MS`,
    /// `DCS_POLL_TIMEOUT_MS` and `DCS_MAX_RETRIES`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("DCS_BASE_URL")
            .ok_or_else(|| ClientError::Config("DCS_BASE_URL is not set".to_string()))?;
        let mut config = Self::new(base_url);

        if let Some(raw) = lookup("DCS_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_var("DCS_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("DCS_POLL_TIMEOUT_MS") {
            config.poll.timeout_ms = Some(parse_var("DCS_POLL_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("DCS_MAX_RETRIES") {
            config.retry.max_retries = parse_var("DCS_MAX_RETRIES", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, ClientError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Config("base_url must not be empty".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ClientError::Config(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ClientError::Config(
                "retry.jitter_factor must be within 0..=1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ClientError::Config(
                "retry.backoff_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ClientError> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{} has an invalid value: {:?}", key, raw)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub commit_path: String,
    pub status_path: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            commit_path: DEFAULT_COMMIT_PATH.to_string(),
            status_path: DEFAULT_STATUS_PATH.to_string(),
        }
    }
}

// Backoff between status polls. max_retries bounds consecutive transient failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powf(attempt as f64))
        .min(self.max_backoff_ms as f64);

        let jitter = rand::random::<f64>() * self.jitter_factor * base_backoff_ms;
        let backoff_ms = base_backoff_ms * (1.0 - self.jitter_factor / 2.0) + jitter;

        Duration::from_millis(backoff_ms.min(self.max_backoff_ms as f64) as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    // None polls until the caller cancels
    pub timeout_ms: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Some(120_000),
        }
    }
}

impl PollConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
