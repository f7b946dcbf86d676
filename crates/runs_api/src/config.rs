use std::collections::BTreeMap;
use std::time::Duration;

use crate::breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;

/// Transport configuration for runs service requests.
#[derive(Debug, Clone)]
pub struct RunsApiConfig {
    /// Bearer token passed to `Authorization`.
    pub api_key: String,
    /// Base URL the `/runs/...` endpoints are resolved against.
    pub base_url: String,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Optional per-request timeout.
    pub timeout: Option<Duration>,
    /// Retry policy applied to every call unless overridden per call.
    pub retry: RetryPolicy,
    /// Circuit breaker settings for the client's own breaker.
    pub breaker: CircuitBreakerConfig,
}

impl RunsApiConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            user_agent: None,
            extra_headers: BTreeMap::new(),
            timeout: None,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker_config(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.extra_headers.extend(headers);
        self
    }
}
