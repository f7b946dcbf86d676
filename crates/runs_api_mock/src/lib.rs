//! Deterministic scripted implementation of the `runs_api` transport seam.
//!
//! This crate contains no network code and is intended for tests of the
//! layers built on top of [`runs_api::RunsApiClient`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use runs_api::{
    ApiRequest, ApiResponse, Method, RetryPolicy, RunsApiClient, RunsApiConfig, RunsApiError,
    Transport,
};
use serde_json::Value;

/// Base URL reported by scripted clients; never dialled.
pub const MOCK_BASE_URL: &str = "http://runs.mock";

#[derive(Debug, Clone)]
enum Reply {
    Response(ApiResponse),
    NetworkError(String),
}

/// One scripted exchange.
#[derive(Debug, Clone)]
pub struct Step {
    delay: Option<Duration>,
    reply: Reply,
}

impl Step {
    pub fn json(status: u16, body: Value) -> Self {
        Self::text(status, body.to_string())
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            delay: None,
            reply: Reply::Response(ApiResponse::new(status, body)),
        }
    }

    /// A connection-level failure, surfaced as [`RunsApiError::Network`].
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            delay: None,
            reply: Reply::NetworkError(message.into()),
        }
    }

    /// Sleeps (on the tokio clock) before replying.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        if let Reply::Response(response) = &mut self.reply {
            response.retry_after = Some(retry_after);
        }
        self
    }
}

type RouteKey = (&'static str, String);

#[derive(Debug, Default)]
struct Route {
    queue: VecDeque<Step>,
    repeat: Option<Step>,
    calls: usize,
}

#[derive(Debug, Default)]
struct ScriptState {
    routes: BTreeMap<RouteKey, Route>,
    requests: Vec<ApiRequest>,
}

/// Replays queued [`Step`]s per `(method, path)` and records every request.
///
/// Once a route's queue is drained its `repeat` step, if any, answers every
/// further call. Unscripted calls fail with [`RunsApiError::InvalidResponse`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, method: Method, path: &str, step: Step) -> &Self {
        lock_unpoisoned(&self.state)
            .routes
            .entry(route_key(method, path))
            .or_default()
            .queue
            .push_back(step);
        self
    }

    pub fn push_all(
        &self,
        method: Method,
        path: &str,
        steps: impl IntoIterator<Item = Step>,
    ) -> &Self {
        for step in steps {
            self.push(method, path, step);
        }
        self
    }

    /// Answers every call after the queue drains.
    pub fn repeat(&self, method: Method, path: &str, step: Step) -> &Self {
        lock_unpoisoned(&self.state)
            .routes
            .entry(route_key(method, path))
            .or_default()
            .repeat = Some(step);
        self
    }

    pub fn calls(&self, method: Method, path: &str) -> usize {
        lock_unpoisoned(&self.state)
            .routes
            .get(&route_key(method, path))
            .map_or(0, |route| route.calls)
    }

    pub fn total_calls(&self) -> usize {
        lock_unpoisoned(&self.state).requests.len()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        lock_unpoisoned(&self.state).requests.clone()
    }

    /// Client over this transport using [`test_config`].
    pub fn client(self: &Arc<Self>) -> RunsApiClient {
        self.client_with_config(test_config())
    }

    pub fn client_with_config(self: &Arc<Self>, config: RunsApiConfig) -> RunsApiClient {
        RunsApiClient::with_transport(config, Arc::clone(self) as Arc<dyn Transport>)
    }

    fn next_step(&self, request: &ApiRequest) -> Option<Step> {
        let mut state = lock_unpoisoned(&self.state);
        state.requests.push(request.clone());
        let route = state
            .routes
            .get_mut(&route_key(request.method, &request.path()))?;
        route.calls += 1;
        route.queue.pop_front().or_else(|| route.repeat.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, RunsApiError> {
        let Some(step) = self.next_step(request) else {
            return Err(RunsApiError::InvalidResponse(format!(
                "no scripted response for {} {}",
                request.method,
                request.path()
            )));
        };

        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }

        match step.reply {
            Reply::Response(response) => Ok(response),
            Reply::NetworkError(message) => Err(RunsApiError::Network(message)),
        }
    }
}

/// Client config with short, jitter-free retries for deterministic timing.
pub fn test_config() -> RunsApiConfig {
    RunsApiConfig::new("test-key", MOCK_BASE_URL).with_retry_policy(test_retry_policy())
}

/// 3 attempts, 100ms doubling to at most 400ms, no jitter.
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::new(
        3,
        Duration::from_millis(100),
        Duration::from_millis(400),
        2.0,
        0.0,
    )
}

fn route_key(method: Method, path: &str) -> RouteKey {
    (method.as_str(), path.to_owned())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
