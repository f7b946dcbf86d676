use runs_api::{BatchStatus, BatchStatusResponse, RunStatus, RunStatusEntry};
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Runs reporting a status outside the known vocabulary.
    pub other: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued + self.processing + self.completed + self.failed + self.cancelled + self.other
    }

    /// Runs not yet in a terminal state, unrecognised statuses included.
    pub fn in_flight(&self) -> usize {
        self.queued + self.processing + self.other
    }

    fn record(&mut self, status: &RunStatus) {
        match status.known() {
            Some(BatchStatus::Queued) => self.queued += 1,
            Some(BatchStatus::Processing) => self.processing += 1,
            Some(BatchStatus::Completed) => self.completed += 1,
            Some(BatchStatus::Failed) => self.failed += 1,
            Some(BatchStatus::Cancelled) => self.cancelled += 1,
            None => self.other += 1,
        }
    }
}

/// One observation of a batch, as produced by a poll tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatusSnapshot {
    pub batch_id: String,
    pub overall_status: BatchStatus,
    pub runs: Vec<RunStatusEntry>,
    pub counts: StatusCounts,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub estimated_completion: Option<OffsetDateTime>,
}

impl BatchStatusSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.overall_status.is_terminal()
    }
}

impl From<BatchStatusResponse> for BatchStatusSnapshot {
    /// Counts come from the per-run list; metadata counts are used only when
    /// the service omits the list.
    fn from(response: BatchStatusResponse) -> Self {
        let counts = if response.runs.is_empty() {
            response
                .metadata
                .as_ref()
                .map(|metadata| StatusCounts {
                    queued: metadata.queued,
                    processing: metadata.processing,
                    completed: metadata.completed,
                    failed: metadata.failed,
                    cancelled: 0,
                    other: 0,
                })
                .unwrap_or_default()
        } else {
            response
                .runs
                .iter()
                .fold(StatusCounts::default(), |mut counts, run| {
                    counts.record(&run.status);
                    counts
                })
        };

        let (started_at, estimated_completion) = response
            .metadata
            .as_ref()
            .map_or((None, None), |metadata| {
                (metadata.started_at, metadata.estimated_completion_time)
            });

        Self {
            batch_id: response.batch_id,
            overall_status: response.status,
            runs: response.runs,
            counts,
            started_at,
            estimated_completion,
        }
    }
}
