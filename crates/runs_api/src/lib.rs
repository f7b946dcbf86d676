//! Transport-level client for the runs service.
//!
//! This crate owns request building, response classification, the retry
//! executor and the circuit breaker. Callers compose batch-level behavior on
//! top of [`RunsApiClient`]; nothing here knows about terminals or config
//! files.
//!
//! Every request flows through
//! `CircuitBreaker::call(|| RetryExecutor::execute(|| Transport::send(..)))`.

pub mod breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod status;
pub mod transport;
pub mod url;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState};
pub use client::{CancelOutcome, RunsApiClient};
pub use config::RunsApiConfig;
pub use error::{ErrorKind, RunsApiError};
pub use payload::{
    BulkCreateData, BulkCreateResponse, BulkMetadata, BulkRunItem, BulkRunsRequest, CreatedRun,
    Envelope, FailedRun, RepositoryRef,
};
pub use retry::{Classify, RetryError, RetryExecutor, RetryPolicy};
pub use status::{
    BatchStatus, BatchStatusMetadata, BatchStatusResponse, RunStatus, RunStatusEntry,
};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
pub use tokio_util::sync::CancellationToken;
