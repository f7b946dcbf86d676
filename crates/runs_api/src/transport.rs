//! Network seam between the client and the wire.
//!
//! A [`Transport`] performs exactly one HTTP exchange and reports the raw
//! status; classification, retries and the circuit breaker live above it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::RunsApiConfig;
use crate::error::RunsApiError;
use crate::headers::build_headers;
use crate::url::{join_segments, normalize_base_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Unencoded path segments, e.g. `["runs", "bulk", "<batch id>"]`.
    pub segments: Vec<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new<S: Into<String>>(method: Method, segments: impl IntoIterator<Item = S>) -> Self {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            body: None,
        }
    }

    pub fn get<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self::new(Method::Get, segments)
    }

    pub fn post<S: Into<String>>(segments: impl IntoIterator<Item = S>, body: Value) -> Self {
        Self::new(Method::Post, segments).with_body(body)
    }

    pub fn delete<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self::new(Method::Delete, segments)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Slash-joined path, used for logging and test routing.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// Raw response; non-2xx statuses are not errors at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RunsApiError> {
        serde_json::from_str(&self.body).map_err(|error| {
            RunsApiError::InvalidResponse(format!("HTTP {} body did not parse: {error}", self.status))
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one exchange. Connection-level failures map to
    /// [`RunsApiError::Network`].
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, RunsApiError>;
}

/// `reqwest`-backed transport.
#[derive(Debug)]
pub struct HttpTransport {
    http: Client,
    base_url: Url,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(config: &RunsApiConfig) -> Result<Self, RunsApiError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let headers = header_map(config)?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|error| RunsApiError::HttpClient(error.to_string()))?;

        Ok(Self {
            http,
            base_url,
            headers,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds (without sending) the `reqwest` request for `request`.
    pub fn build_request(&self, request: &ApiRequest) -> Result<reqwest::Request, RunsApiError> {
        let url = join_segments(&self.base_url, &request.segments)?;
        let builder = match request.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Delete => self.http.delete(url),
        };
        let builder = builder.headers(self.headers.clone());
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };
        builder
            .build()
            .map_err(|error| RunsApiError::HttpClient(error.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, RunsApiError> {
        let http_request = self.build_request(request)?;
        let response = self.http.execute(http_request).await?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await?;
        debug!(method = %request.method, path = %request.path(), status, "runs api response");

        Ok(ApiResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn header_map(config: &RunsApiConfig) -> Result<HeaderMap, RunsApiError> {
    let mut out = HeaderMap::new();
    for (key, value) in build_headers(config, None)? {
        out.insert(
            HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| RunsApiError::InvalidHeader(format!("invalid header key: {key}")))?,
            HeaderValue::from_str(&value)
                .map_err(|_| RunsApiError::InvalidHeader(format!("invalid header value for {key}")))?,
        );
    }
    Ok(out)
}

/// Reads a delay-seconds `Retry-After` header; HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
