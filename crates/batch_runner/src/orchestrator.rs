use std::time::Duration;

use futures_util::StreamExt;
use runs_api::{CancelOutcome, RunsApiClient};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::BatchError;
use crate::poller::{PollEvent, PollerConfig, StatusPoller, DEFAULT_MAX_WAIT};
use crate::request::BatchRequest;
use crate::snapshot::BatchStatusSnapshot;
use crate::submitter::{BatchSubmissionResult, BatchSubmitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Follow the batch after submission.
    pub poll: bool,
    /// Ceiling on polling time before reporting [`Completion::TimedOut`].
    pub max_wait: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll: true,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl RunOptions {
    pub fn submit_only() -> Self {
        Self {
            poll: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Polling was not requested, or nothing was left to follow.
    NotPolled,
    /// The batch reached a terminal status.
    Finished,
    /// The wait ceiling passed; the batch may still be running server-side.
    TimedOut,
    /// The caller cancelled while polling.
    Cancelled,
}

/// What was accepted, and what finally happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub submission: BatchSubmissionResult,
    pub final_snapshot: Option<BatchStatusSnapshot>,
    pub completion: Completion,
    pub snapshots_seen: usize,
}

/// Submits a batch, optionally follows it to completion, and reports.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    client: RunsApiClient,
    submitter: BatchSubmitter,
    poller: StatusPoller,
}

impl BatchOrchestrator {
    pub fn new(client: RunsApiClient) -> Self {
        Self::with_poller_config(client, PollerConfig::default())
    }

    pub fn with_poller_config(client: RunsApiClient, config: PollerConfig) -> Self {
        Self {
            submitter: BatchSubmitter::new(client.clone()),
            poller: StatusPoller::with_config(client.clone(), config),
            client,
        }
    }

    pub fn client(&self) -> &RunsApiClient {
        &self.client
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    pub async fn submit(
        &self,
        request: &BatchRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchSubmissionResult, BatchError> {
        self.submitter.submit(request, cancel).await
    }

    /// Submits `request` and, when `options.poll` is set and something is
    /// in flight, polls until completion. `observer` sees every snapshot in
    /// fetch order.
    pub async fn run<F>(
        &self,
        request: &BatchRequest,
        options: &RunOptions,
        cancel: &CancellationToken,
        mut observer: F,
    ) -> Result<BatchReport, BatchError>
    where
        F: FnMut(&BatchStatusSnapshot),
    {
        let submission = self.submitter.submit(request, cancel).await?;
        if !options.poll || !submission.has_in_flight() {
            return Ok(BatchReport {
                submission,
                final_snapshot: None,
                completion: Completion::NotPolled,
                snapshots_seen: 0,
            });
        }

        let mut session = self
            .poller
            .start(submission.batch_id.clone(), options.max_wait, cancel);
        let mut final_snapshot: Option<BatchStatusSnapshot> = None;
        let mut snapshots_seen = 0usize;
        let mut completion = None;

        while let Some(event) = session.next().await {
            match event {
                PollEvent::Snapshot(snapshot) => {
                    snapshots_seen += 1;
                    observer(&snapshot);
                    final_snapshot = Some(snapshot);
                }
                PollEvent::TimedOut => {
                    warn!(
                        batch_id = %submission.batch_id,
                        max_wait_secs = options.max_wait.as_secs(),
                        "gave up waiting; batch may still be processing"
                    );
                    completion = Some(Completion::TimedOut);
                }
                PollEvent::Failed(source) => {
                    return Err(BatchError::Polling {
                        batch_id: submission.batch_id.clone(),
                        submission: Box::new(submission),
                        source,
                    });
                }
            }
        }

        let completion = completion.unwrap_or_else(|| {
            match &final_snapshot {
                Some(snapshot) if snapshot.is_terminal() => Completion::Finished,
                _ => Completion::Cancelled,
            }
        });
        info!(
            batch_id = %submission.batch_id,
            ?completion,
            snapshots_seen,
            "batch run finished"
        );

        Ok(BatchReport {
            submission,
            final_snapshot,
            completion,
            snapshots_seen,
        })
    }

    /// Requests cancellation of the whole batch.
    pub async fn cancel_batch(
        &self,
        batch_id: &str,
        cancel: &CancellationToken,
    ) -> Result<CancelOutcome, BatchError> {
        Ok(self.client.cancel_batch(batch_id, cancel).await?)
    }
}
