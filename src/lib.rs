//! Resilient client for submitting and following batches of coding-agent
//! runs.
//!
//! The heavy lifting lives in the workspace crates:
//! - `runs_api`: transport, error taxonomy, retry executor, circuit breaker.
//! - `batch_runner`: submission, status polling, orchestration.
//!
//! This crate wires them to the environment ([`config::EnvConfig`]), installs
//! logging ([`logging::init`]) and renders results ([`report`]).

pub mod config;
pub mod logging;
pub mod report;

pub use batch_runner::{
    BatchError, BatchOrchestrator, BatchReport, BatchRequest, Completion, ItemOutcome, PollEvent,
    RunItem, RunOptions,
};
pub use config::{ConfigError, EnvConfig};
pub use runs_api::{CancellationToken, RepositoryRef, RunsApiClient, RunsApiError};

/// Builds an HTTP-backed orchestrator from `config`.
pub fn build_orchestrator(config: &EnvConfig) -> Result<BatchOrchestrator, RunsApiError> {
    let client = RunsApiClient::new(config.runs_api_config())?;
    Ok(BatchOrchestrator::with_poller_config(
        client,
        config.poller_config(),
    ))
}

/// Reads [`EnvConfig`], installs logging and builds an orchestrator.
pub fn orchestrator_from_env() -> Result<(EnvConfig, BatchOrchestrator), StartupError> {
    let config = EnvConfig::from_env()?;
    logging::init(&config.log_filter);
    let orchestrator = build_orchestrator(&config)?;
    tracing::debug!(
        base_url = %config.base_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        max_wait_secs = config.max_wait.as_secs(),
        "orchestrator configured"
    );
    Ok((config, orchestrator))
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] RunsApiError),
}
