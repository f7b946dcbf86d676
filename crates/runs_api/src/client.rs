use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::breaker::CircuitBreaker;
use crate::config::RunsApiConfig;
use crate::error::RunsApiError;
use crate::payload::{BulkCreateData, BulkCreateResponse, BulkRunsRequest, MaybeEnveloped};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::status::BatchStatusResponse;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::url::BULK_RUNS_SEGMENTS;

/// Result of `DELETE /runs/bulk/{batchId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The batch had already finished; nothing was cancelled.
    AlreadyTerminal,
}

/// Client for the runs service.
///
/// Every request runs as `breaker.call(|| retry.execute(send))`, so a whole
/// sequence of retried failures counts once against the circuit breaker.
#[derive(Clone)]
pub struct RunsApiClient {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    config: RunsApiConfig,
}

impl std::fmt::Debug for RunsApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunsApiClient")
            .field("base_url", &self.config.base_url)
            .field("breaker", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

impl RunsApiClient {
    /// Builds a client backed by [`HttpTransport`].
    pub fn new(config: RunsApiConfig) -> Result<Self, RunsApiError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: RunsApiConfig, transport: Arc<dyn Transport>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        Self {
            transport,
            breaker,
            config,
        }
    }

    /// Replaces the client's own breaker, e.g. to share one across clients.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn config(&self) -> &RunsApiConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Sends `request` under the configured retry policy.
    pub async fn call(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, RunsApiError> {
        self.call_with_policy(request, &self.config.retry, cancel)
            .await
    }

    /// Sends `request` under `policy`; returns only 2xx responses.
    pub async fn call_with_policy(
        &self,
        request: &ApiRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, RunsApiError> {
        let executor = RetryExecutor::new(policy.clone());
        self.breaker
            .call(|| async {
                executor
                    .execute(|| self.send_once(request), cancel)
                    .await
                    .map_err(RunsApiError::from_retry)
            })
            .await
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<ApiResponse, RunsApiError> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        debug!(
            method = %request.method,
            path = %request.path(),
            status = response.status,
            "runs api returned error status"
        );
        Err(RunsApiError::from_response(&response))
    }

    /// `POST /runs/bulk`.
    pub async fn create_batch(
        &self,
        request: &BulkRunsRequest,
        cancel: &CancellationToken,
    ) -> Result<BulkCreateResponse, RunsApiError> {
        let body = serde_json::to_value(request)?;
        let response = self
            .call(&ApiRequest::post(BULK_RUNS_SEGMENTS, body), cancel)
            .await?;
        let data = response
            .json::<MaybeEnveloped<BulkCreateData>>()?
            .into_inner();
        info!(
            batch_id = %data.batch_id,
            status = response.status,
            accepted = data.successful.len(),
            rejected = data.failed.len(),
            "batch created"
        );
        Ok(BulkCreateResponse {
            status: response.status,
            data,
        })
    }

    /// `GET /runs/bulk/{batchId}`.
    pub async fn batch_status(
        &self,
        batch_id: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchStatusResponse, RunsApiError> {
        let response = self
            .call_with_policy(&ApiRequest::get(batch_segments(batch_id)), policy, cancel)
            .await?;
        Ok(response
            .json::<MaybeEnveloped<BatchStatusResponse>>()?
            .into_inner())
    }

    /// `DELETE /runs/bulk/{batchId}`. A `409` means the batch already
    /// finished; `404` surfaces as [`RunsApiError::NotFound`].
    pub async fn cancel_batch(
        &self,
        batch_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CancelOutcome, RunsApiError> {
        match self
            .call(&ApiRequest::delete(batch_segments(batch_id)), cancel)
            .await
        {
            Ok(_) => {
                info!(batch_id, "batch cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            Err(RunsApiError::Conflict { .. }) => {
                info!(batch_id, "batch already terminal");
                Ok(CancelOutcome::AlreadyTerminal)
            }
            Err(error) => Err(error),
        }
    }
}

fn batch_segments(batch_id: &str) -> Vec<String> {
    BULK_RUNS_SEGMENTS
        .iter()
        .map(|segment| (*segment).to_owned())
        .chain(std::iter::once(batch_id.to_owned()))
        .collect()
}
