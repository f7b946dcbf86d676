//! Batch-level orchestration on top of `runs_api`.
//!
//! [`BatchSubmitter`] turns a validated [`BatchRequest`] into index-aligned
//! per-item outcomes, [`StatusPoller`] follows a batch as a stream of
//! snapshots, and [`BatchOrchestrator`] sequences the two.

pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod request;
pub mod snapshot;
pub mod submitter;

pub use error::BatchError;
pub use orchestrator::{BatchOrchestrator, BatchReport, Completion, RunOptions};
pub use poller::{PollEvent, PollSession, PollerConfig, StatusPoller};
pub use request::{BatchRequest, RunItem, MAX_BATCH_SIZE};
pub use snapshot::{BatchStatusSnapshot, StatusCounts};
pub use submitter::{
    BatchSubmissionResult, BatchSubmitter, ItemOutcome, SubmissionTotals, TotalsMismatch,
};
