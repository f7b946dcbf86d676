//! Environment configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use batch_runner::poller::{DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL};
use batch_runner::{PollerConfig, RunOptions};
use runs_api::breaker::DEFAULT_FAILURE_THRESHOLD;
use runs_api::retry::DEFAULT_MAX_ATTEMPTS;
use runs_api::{CircuitBreakerConfig, RetryPolicy, RunsApiConfig};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.runfleet.dev";
pub const DEFAULT_LOG_FILTER: &str = "warn";

pub const ENV_API_KEY: &str = "RUNFLEET_API_KEY";
pub const ENV_BASE_URL: &str = "RUNFLEET_BASE_URL";
pub const ENV_POLL_INTERVAL_MS: &str = "RUNFLEET_POLL_INTERVAL_MS";
pub const ENV_MAX_WAIT_SECS: &str = "RUNFLEET_MAX_WAIT_SECS";
pub const ENV_TIMEOUT_SECS: &str = "RUNFLEET_TIMEOUT_SECS";
pub const ENV_RETRY_ATTEMPTS: &str = "RUNFLEET_RETRY_ATTEMPTS";
pub const ENV_BREAKER_THRESHOLD: &str = "RUNFLEET_BREAKER_THRESHOLD";
pub const ENV_LOG: &str = "RUNFLEET_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{key}={value:?} is not a valid {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub api_key: String,
    pub base_url: String,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub timeout: Option<Duration>,
    pub retry_attempts: u32,
    pub breaker_threshold: u32,
    pub log_filter: String,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env_string_opt(ENV_API_KEY).ok_or(ConfigError::Missing(ENV_API_KEY))?;

        Ok(Self {
            api_key,
            base_url: env_string_opt(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            poll_interval: env_parse::<u64>(ENV_POLL_INTERVAL_MS, "positive number of milliseconds")?
                .filter(|millis| *millis > 0)
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
            max_wait: env_parse::<u64>(ENV_MAX_WAIT_SECS, "number of seconds")?
                .map_or(DEFAULT_MAX_WAIT, Duration::from_secs),
            timeout: env_parse::<u64>(ENV_TIMEOUT_SECS, "number of seconds")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            retry_attempts: env_parse(ENV_RETRY_ATTEMPTS, "attempt count")?
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            breaker_threshold: env_parse(ENV_BREAKER_THRESHOLD, "failure count")?
                .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            log_filter: env_string_opt(ENV_LOG).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned()),
        })
    }

    pub fn runs_api_config(&self) -> RunsApiConfig {
        let mut config = RunsApiConfig::new(&self.api_key, &self.base_url)
            .with_retry_policy(RetryPolicy::default().with_max_attempts(self.retry_attempts))
            .with_breaker_config(
                CircuitBreakerConfig::default().with_failure_threshold(self.breaker_threshold),
            );
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        config
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::default().with_interval(self.poll_interval)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            poll: true,
            max_wait: self.max_wait,
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}

fn env_parse<T: FromStr>(
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    env_string_opt(key)
        .map(|value| {
            value.parse::<T>().map_err(|_| ConfigError::Invalid {
                key,
                value,
                expected,
            })
        })
        .transpose()
}
