use runs_api::{BulkCreateResponse, BulkMetadata, RunsApiClient};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BatchError;
use crate::request::BatchRequest;

/// What happened to one submitted item, aligned with its request index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Accepted {
        id: String,
        title: Option<String>,
        status: String,
        repository: Option<String>,
    },
    Rejected {
        /// Machine-readable code such as `DUPLICATE_RUN`.
        code: String,
        message: Option<String>,
        existing_run_id: Option<String>,
    },
    /// Not reported yet; the service is still processing it.
    Pending,
}

impl ItemOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionTotals {
    pub requested: usize,
    pub successful: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Derived totals disagree with what the service reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "service reported {reported_requested} requested / {reported_successful} successful / \
     {reported_failed} failed, but outcomes show {derived:?}"
)]
pub struct TotalsMismatch {
    pub reported_requested: usize,
    pub reported_successful: usize,
    pub reported_failed: usize,
    pub derived: SubmissionTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSubmissionResult {
    pub batch_id: String,
    pub batch_title: Option<String>,
    pub http_status: u16,
    outcomes: Vec<ItemOutcome>,
    #[serde(skip)]
    reported: Option<BulkMetadata>,
}

impl BatchSubmissionResult {
    /// Maps the create response onto `item_count` index-aligned outcomes.
    ///
    /// Items the service did not mention stay [`ItemOutcome::Pending`].
    /// Out-of-range or repeated indices are ignored; the first report wins.
    pub fn from_response(response: BulkCreateResponse, item_count: usize) -> Self {
        let BulkCreateResponse { status, data } = response;
        let mut outcomes = vec![ItemOutcome::Pending; item_count];

        let accepted = data.successful.into_iter().map(|run| {
            (
                run.request_index,
                ItemOutcome::Accepted {
                    id: run.id,
                    title: run.title,
                    status: run.status,
                    repository: run.repository_name,
                },
            )
        });
        let rejected = data.failed.into_iter().map(|run| {
            (
                run.request_index,
                ItemOutcome::Rejected {
                    code: run.error,
                    message: run.message,
                    existing_run_id: run.existing_run_id,
                },
            )
        });

        for (index, outcome) in accepted.chain(rejected) {
            match outcomes.get_mut(index) {
                Some(slot) if slot.is_pending() => *slot = outcome,
                Some(_) => warn!(
                    batch_id = %data.batch_id,
                    index,
                    "duplicate outcome for request index; keeping first"
                ),
                None => warn!(
                    batch_id = %data.batch_id,
                    index,
                    item_count,
                    "outcome for out-of-range request index ignored"
                ),
            }
        }

        let result = Self {
            batch_id: data.batch_id,
            batch_title: data.batch_title,
            http_status: status,
            outcomes,
            reported: data.metadata,
        };
        if status != 207 && result.totals().pending > 0 {
            warn!(
                batch_id = %result.batch_id,
                status,
                pending = result.totals().pending,
                "service left items unreported outside a multi-status response"
            );
        }
        result
    }

    pub fn outcomes(&self) -> &[ItemOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, index: usize) -> Option<&ItemOutcome> {
        self.outcomes.get(index)
    }

    /// Upstream-reported metadata, if present.
    pub fn reported(&self) -> Option<&BulkMetadata> {
        self.reported.as_ref()
    }

    pub fn totals(&self) -> SubmissionTotals {
        self.outcomes.iter().fold(
            SubmissionTotals {
                requested: self.outcomes.len(),
                ..SubmissionTotals::default()
            },
            |mut totals, outcome| {
                match outcome {
                    ItemOutcome::Accepted { .. } => totals.successful += 1,
                    ItemOutcome::Rejected { .. } => totals.failed += 1,
                    ItemOutcome::Pending => totals.pending += 1,
                }
                totals
            },
        )
    }

    pub fn is_partial(&self) -> bool {
        self.http_status == 207
    }

    /// True when at least one item was accepted or may still be accepted.
    pub fn has_in_flight(&self) -> bool {
        self.outcomes.iter().any(|outcome| !outcome.is_rejected())
    }

    pub fn accepted(&self) -> impl Iterator<Item = (usize, &ItemOutcome)> {
        self.indexed(ItemOutcome::is_accepted)
    }

    pub fn rejected(&self) -> impl Iterator<Item = (usize, &ItemOutcome)> {
        self.indexed(ItemOutcome::is_rejected)
    }

    pub fn pending(&self) -> impl Iterator<Item = usize> + '_ {
        self.indexed(ItemOutcome::is_pending).map(|(index, _)| index)
    }

    fn indexed(
        &self,
        keep: fn(&ItemOutcome) -> bool,
    ) -> impl Iterator<Item = (usize, &ItemOutcome)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(move |(_, outcome)| keep(outcome))
    }

    /// Compares derived totals with the service's metadata. Pending items
    /// are not counted on either side of the successful/failed check.
    pub fn reconcile(&self) -> Result<SubmissionTotals, TotalsMismatch> {
        let derived = self.totals();
        let Some(reported) = self.reported else {
            return Ok(derived);
        };
        if reported.total_requested == derived.requested
            && reported.total_successful == derived.successful
            && reported.total_failed == derived.failed
        {
            return Ok(derived);
        }
        Err(TotalsMismatch {
            reported_requested: reported.total_requested,
            reported_successful: reported.total_successful,
            reported_failed: reported.total_failed,
            derived,
        })
    }
}

/// Sends a [`BatchRequest`] as one bulk create call.
#[derive(Debug, Clone)]
pub struct BatchSubmitter {
    client: RunsApiClient,
}

impl BatchSubmitter {
    pub fn new(client: RunsApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RunsApiClient {
        &self.client
    }

    /// Validates locally, then submits. Per-item rejections inside a 2xx
    /// response are data and are never retried.
    pub async fn submit(
        &self,
        request: &BatchRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchSubmissionResult, BatchError> {
        request.validate()?;
        debug!(items = request.len(), repository = request.repository.as_str(), "submitting batch");

        let response = self.client.create_batch(&request.to_wire(), cancel).await?;
        let result = BatchSubmissionResult::from_response(response, request.len());

        let totals = result.totals();
        info!(
            batch_id = %result.batch_id,
            requested = totals.requested,
            successful = totals.successful,
            failed = totals.failed,
            pending = totals.pending,
            "batch submitted"
        );
        if let Err(mismatch) = result.reconcile() {
            warn!(batch_id = %result.batch_id, %mismatch, "submission totals do not reconcile");
        }
        Ok(result)
    }
}
