use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

use crate::retry::{Classify, RetryError};
use crate::transport::ApiResponse;

const NETWORK_HINT: &str = "Check your network connection and try again.";
const SERVER_HINT: &str = "The service is having trouble right now. Try again in a few minutes.";
const AUTH_HINT: &str = "Reconfigure your API key and try again.";
const QUOTA_HINT: &str = "Upgrade your plan to raise this limit.";
const CIRCUIT_HINT: &str =
    "Too many consecutive failures reaching the service. Wait a moment before retrying.";

#[derive(Debug, Error)]
pub enum RunsApiError {
    #[error("API key is required")]
    MissingApiKey,

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("request rejected (HTTP {status}): {message}")]
    Validation {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Upstream message is kept verbatim (e.g. a missing branch and repository).
    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Quota {
        message: String,
        upgrade_url: Option<String>,
    },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("circuit breaker is open; upstream calls are suspended")]
    CircuitOpen,

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<RunsApiError>,
    },

    #[error("request was cancelled")]
    Cancelled,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification for programmatic branching by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    RateLimit,
    Server,
    Auth,
    Validation,
    NotFound,
    Quota,
    Conflict,
    CircuitOpen,
    Cancelled,
    Config,
    Other,
}

impl RunsApiError {
    /// Classifies a non-2xx response.
    pub fn from_response(response: &ApiResponse) -> Self {
        let status = response.status;
        let upstream = UpstreamError::parse(&response.body);
        let message = upstream.message_or_fallback(status, &response.body);

        if (400..500).contains(&status) && upstream.is_quota(status) {
            return Self::Quota {
                message,
                upgrade_url: upstream.upgrade_url,
            };
        }

        match status {
            429 => Self::RateLimited {
                message,
                retry_after: response.retry_after,
            },
            408 | 500..=599 => Self::Server { status, message },
            401 | 403 => Self::Auth { status, message },
            400 | 422 => Self::Validation {
                status,
                code: upstream.code,
                message,
            },
            404 => Self::NotFound { message },
            409 => Self::Conflict { message },
            _ => Self::Status { status, message },
        }
    }

    /// Unwraps permanent failures so callers see the classified error directly.
    pub fn from_retry(error: RetryError<RunsApiError>) -> Self {
        match error {
            RetryError::Permanent(error) => error,
            RetryError::Exhausted { attempts, last } => Self::RetryExhausted {
                attempts,
                last: Box::new(last),
            },
            RetryError::Cancelled => Self::Cancelled,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Server { .. } => ErrorKind::Server,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Quota { .. } => ErrorKind::Quota,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::RetryExhausted { last, .. } => last.kind(),
            Self::MissingApiKey
            | Self::InvalidBaseUrl(_)
            | Self::InvalidHeader(_)
            | Self::HttpClient(_) => ErrorKind::Config,
            Self::Status { .. } | Self::InvalidResponse(_) | Self::Json(_) => ErrorKind::Other,
        }
    }

    /// True for failures worth another attempt on a later poll tick.
    pub fn is_transient(&self) -> bool {
        self.is_retryable() || matches!(self, Self::CircuitOpen | Self::RetryExhausted { .. })
    }

    /// Remediation hint shown next to the error message.
    pub fn hint(&self) -> Option<String> {
        match self.kind() {
            ErrorKind::Network => Some(NETWORK_HINT.to_owned()),
            ErrorKind::Server | ErrorKind::RateLimit => Some(SERVER_HINT.to_owned()),
            ErrorKind::Auth => Some(AUTH_HINT.to_owned()),
            ErrorKind::Config if matches!(self, Self::MissingApiKey) => Some(AUTH_HINT.to_owned()),
            ErrorKind::CircuitOpen => Some(CIRCUIT_HINT.to_owned()),
            ErrorKind::Quota => Some(match self {
                Self::Quota {
                    upgrade_url: Some(url),
                    ..
                } => format!("{QUOTA_HINT} {url}"),
                _ => QUOTA_HINT.to_owned(),
            }),
            _ => None,
        }
    }

    /// Message plus hint, formatted for display.
    pub fn display_message(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n{hint}"),
            None => self.to_string(),
        }
    }
}

impl Classify for RunsApiError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn is_upstream_fault(&self) -> bool {
        self.is_retryable() || matches!(self, Self::RetryExhausted { .. })
    }

    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for RunsApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

/// Normalized view of the error bodies the service returns.
///
/// Accepted shapes: `{"error": "CODE", "message": ".."}`,
/// `{"error": {"code": "..", "message": ".."}}` and `{"message": ".."}`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub code: Option<String>,
    pub message: Option<String>,
    pub upgrade_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload {
    error: Option<ErrorField>,
    message: Option<String>,
    code: Option<String>,
    upgrade_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Code(String),
    Detail(ErrorDetail),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
    upgrade_url: Option<String>,
}

impl UpstreamError {
    pub fn parse(body: &str) -> Self {
        let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) else {
            return Self::default();
        };

        let mut parsed = Self {
            code: payload.code.and_then(non_empty),
            message: payload.message.and_then(non_empty),
            upgrade_url: payload.upgrade_url.and_then(non_empty),
        };

        match payload.error {
            Some(ErrorField::Code(code)) => {
                parsed.code = parsed.code.or_else(|| non_empty(code));
            }
            Some(ErrorField::Detail(detail)) => {
                parsed.code = parsed.code.or_else(|| detail.code.and_then(non_empty));
                parsed.message = parsed.message.or_else(|| detail.message.and_then(non_empty));
                parsed.upgrade_url = parsed
                    .upgrade_url
                    .or_else(|| detail.upgrade_url.and_then(non_empty));
            }
            None => {}
        }

        parsed
    }

    fn is_quota(&self, status: u16) -> bool {
        if status == 402 {
            return true;
        }
        let pattern = quota_regex();
        self.code.as_deref().is_some_and(|code| pattern.is_match(code))
            || self
                .message
                .as_deref()
                .is_some_and(|message| pattern.is_match(message))
    }

    fn message_or_fallback(&self, status: u16, body: &str) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        if let Some(code) = &self.code {
            return code.clone();
        }
        let body = body.trim();
        if body.is_empty() {
            StatusCode::from_u16(status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("request failed")
                .to_owned()
        } else {
            body.to_owned()
        }
    }
}

/// Extracts a human-readable message from an error body.
pub fn parse_error_message(status: u16, body: &str) -> String {
    UpstreamError::parse(body).message_or_fallback(status, body)
}

fn quota_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)quota|plan.?limit|usage.?limit").expect("quota regex must compile")
    })
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
